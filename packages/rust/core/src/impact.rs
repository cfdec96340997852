//! Impact aggregation: categorized, weighted rows × factor table →
//! grouped summary with imperial and metric views.
//!
//! Both views are derived from the same aggregation pass so they can
//! never drift apart. A category missing from the factor table
//! contributes 0 on every dimension.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::path::Path;

use tracing::info;

use foodprint_shared::{CategorizedRow, FoodprintError, Result};

/// Pounds per kilogram, as used for the metric weight/CO2/water columns.
const LBS_PER_KG: f64 = 2.2046;

/// Divisor applied to summed kcal factors (they are tabulated per kg).
const KCAL_PER_LB_DIVISOR: f64 = 2.20462;

/// Gallons of water per tabulated liter-per-kg unit.
const WATER_GALLONS_FACTOR: f64 = 0.119826427;

/// Categories contributing to the dairy subtotal, matched on the trimmed,
/// lower-cased category label.
const DAIRY_CATEGORIES: &[&str] = &[
    "butter",
    "cheese",
    "cream",
    "dairy milk",
    "buttermilk",
    "ice cream",
    "low fat yogurt",
    "milk powder",
    "yogurt",
    "concentrated milk",
    "ghee",
    "lactose powder",
    "skim milk",
    "whey powder",
];

// ---------------------------------------------------------------------------
// Factor table
// ---------------------------------------------------------------------------

/// Per-category impact coefficients, per pound of food.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImpactFactors {
    pub co2: f64,
    pub land_acres: f64,
    pub land_sq_meters: f64,
    pub carbon_opp: f64,
    pub kcal: f64,
    pub direct_lives: f64,
    pub total_lives: f64,
    pub water: f64,
    pub eutro: f64,
}

/// Static category → factors mapping, loaded once from `factors.csv`.
#[derive(Debug, Clone)]
pub struct FactorTable {
    factors: BTreeMap<String, ImpactFactors>,
}

impl FactorTable {
    /// Load the factor table. Missing required columns abort the run;
    /// non-numeric cells coerce to 0. The `land_metric` column is divided
    /// by the lbs-per-kg constant at load, matching the downstream
    /// sq-meters view.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| FoodprintError::io(path, std::io::Error::other(e)))?;

        let headers: BTreeMap<String, usize> = reader
            .headers()
            .map_err(|e| FoodprintError::parse(format!("{}: bad header: {e}", path.display())))?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();

        let col = |name: &str| {
            headers.get(name).copied().ok_or_else(|| {
                FoodprintError::validation(format!(
                    "{}: factor table missing required column '{name}'",
                    path.display()
                ))
            })
        };

        let category = col("category")?;
        let co2 = col("co2")?;
        let land_acres = col("land_acres")?;
        let land_metric = col("land_metric")?;
        let carbon_opp = col("carbon_opp")?;
        let kcal = col("kcal")?;
        let d_lives = col("d_lives")?;
        let t_lives = col("t_lives")?;
        let water = col("water")?;
        let eutro = col("eutro")?;

        let numeric = |record: &csv::StringRecord, col: usize| -> f64 {
            record
                .get(col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(0.0)
        };

        let mut factors = BTreeMap::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| FoodprintError::parse(format!("{}: {e}", path.display())))?;
            let name = record.get(category).unwrap_or("").trim().to_string();
            if name.is_empty() {
                continue;
            }
            factors.insert(
                name,
                ImpactFactors {
                    co2: numeric(&record, co2),
                    land_acres: numeric(&record, land_acres),
                    land_sq_meters: numeric(&record, land_metric) / LBS_PER_KG,
                    carbon_opp: numeric(&record, carbon_opp),
                    kcal: numeric(&record, kcal),
                    direct_lives: numeric(&record, d_lives),
                    total_lives: numeric(&record, t_lives),
                    water: numeric(&record, water),
                    eutro: numeric(&record, eutro),
                },
            );
        }

        info!(path = %path.display(), categories = factors.len(), "factor table loaded");
        Ok(Self { factors })
    }

    /// Build a table from in-memory entries (tests, fixtures).
    pub fn from_entries(entries: impl IntoIterator<Item = (String, ImpactFactors)>) -> Self {
        Self {
            factors: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, category: &str) -> Option<&ImpactFactors> {
        self.factors.get(category)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Summed impact quantities for one category (or a synthetic summary row).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImpactTotals {
    pub lbs: f64,
    pub co2: f64,
    pub land_acres: f64,
    pub land_sq_meters: f64,
    pub carbon_opp: f64,
    pub kcal: f64,
    pub direct_lives: f64,
    pub total_lives: f64,
    pub water: f64,
    pub eutro: f64,
}

impl AddAssign for ImpactTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.lbs += rhs.lbs;
        self.co2 += rhs.co2;
        self.land_acres += rhs.land_acres;
        self.land_sq_meters += rhs.land_sq_meters;
        self.carbon_opp += rhs.carbon_opp;
        self.kcal += rhs.kcal;
        self.direct_lives += rhs.direct_lives;
        self.total_lives += rhs.total_lives;
        self.water += rhs.water;
        self.eutro += rhs.eutro;
    }
}

impl ImpactTotals {
    /// Impact of one row: pounds × per-category factors, all-zero when the
    /// category is absent from the table.
    fn from_row(lbs: f64, factors: Option<&ImpactFactors>) -> Self {
        let Some(f) = factors else {
            return Self {
                lbs,
                ..Self::default()
            };
        };
        Self {
            lbs,
            co2: lbs * f.co2,
            land_acres: lbs * f.land_acres,
            land_sq_meters: lbs * f.land_sq_meters,
            carbon_opp: lbs * f.carbon_opp,
            kcal: lbs * f.kcal,
            direct_lives: lbs * f.direct_lives,
            total_lives: lbs * f.total_lives,
            water: lbs * f.water,
            eutro: lbs * f.eutro,
        }
    }
}

/// Grouped impact summary: per-category rows plus the two synthetic rows.
#[derive(Debug, Clone)]
pub struct GroupedSummary {
    /// Per-category totals, sorted by category name.
    pub categories: Vec<(String, ImpactTotals)>,
    /// Sum of every category row.
    pub total: ImpactTotals,
    /// Sum over the fixed dairy category set only.
    pub dairy_subtotal: ImpactTotals,
}

/// Join rows against the factor table, group by category, and append the
/// `Total` and dairy-subtotal rows. One pass feeds both output views.
pub fn aggregate(rows: &[CategorizedRow], factors: &FactorTable) -> GroupedSummary {
    let mut grouped: BTreeMap<String, ImpactTotals> = BTreeMap::new();

    for row in rows {
        let totals = ImpactTotals::from_row(row.lbs, factors.get(&row.category));
        *grouped.entry(row.category.clone()).or_default() += totals;
    }

    let mut total = ImpactTotals::default();
    let mut dairy_subtotal = ImpactTotals::default();

    for (category, totals) in &grouped {
        total += *totals;
        if DAIRY_CATEGORIES.contains(&category.trim().to_lowercase().as_str()) {
            dairy_subtotal += *totals;
        }
    }

    info!(
        categories = grouped.len(),
        total_lbs = total.lbs,
        "impact aggregation complete"
    );

    GroupedSummary {
        categories: grouped.into_iter().collect(),
        total,
        dairy_subtotal,
    }
}

// ---------------------------------------------------------------------------
// Output views
// ---------------------------------------------------------------------------

/// A formatted summary table ready for CSV serialization.
#[derive(Debug, Clone)]
pub struct SummaryView {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Imperial view: pounds, lbs CO2e, acres, gallons.
pub fn render_imperial(summary: &GroupedSummary) -> SummaryView {
    let header = [
        "CATEGORY",
        "(weight/lbs)",
        "(calories)",
        "(lbs CO2e)",
        "(lbs carbon opp costs)",
        "(direct animal lives)",
        "(total animal lives)",
        "(water gallons)",
        "(land use acres)",
        "(lbs PO4-eq eutrophication)",
    ]
    .map(String::from)
    .to_vec();

    let format_row = |category: &str, t: &ImpactTotals| {
        vec![
            category.to_string(),
            format!("{:.1}", t.lbs),
            format!("{:.0}", t.kcal / KCAL_PER_LB_DIVISOR),
            format!("{:.0}", t.co2),
            format!("{:.0}", t.carbon_opp),
            format!("{:.1}", t.direct_lives),
            format!("{:.1}", t.total_lives),
            format!("{:.0}", t.water * WATER_GALLONS_FACTOR),
            format!("{:.3}", t.land_acres),
            format!("{:.5}", t.eutro / 1000.0),
        ]
    };

    SummaryView {
        header,
        rows: view_rows(summary, format_row),
    }
}

/// Metric view: kilograms, kg CO2e, square meters, liters — the same
/// summed quantities under fixed unit-conversion divisors.
pub fn render_metric(summary: &GroupedSummary) -> SummaryView {
    let header = [
        "CATEGORY",
        "(weight/kg)",
        "(calories)",
        "(kg CO2e)",
        "(kg carbon opp costs)",
        "(direct animal lives)",
        "(total animal lives)",
        "(water liters)",
        "(land use sq meters)",
        "(grams PO4-eq eutrophication)",
    ]
    .map(String::from)
    .to_vec();

    let format_row = |category: &str, t: &ImpactTotals| {
        vec![
            category.to_string(),
            format!("{:.1}", t.lbs / LBS_PER_KG),
            format!("{:.0}", t.kcal / KCAL_PER_LB_DIVISOR),
            format!("{:.0}", t.co2 / LBS_PER_KG),
            format!("{:.0}", t.carbon_opp / LBS_PER_KG),
            format!("{:.1}", t.direct_lives),
            format!("{:.1}", t.total_lives),
            format!("{:.2}", t.water / LBS_PER_KG),
            format!("{:.0}", t.land_sq_meters),
            format!("{:.2}", t.eutro / LBS_PER_KG),
        ]
    };

    SummaryView {
        header,
        rows: view_rows(summary, format_row),
    }
}

fn view_rows(
    summary: &GroupedSummary,
    format_row: impl Fn(&str, &ImpactTotals) -> Vec<String>,
) -> Vec<Vec<String>> {
    summary
        .categories
        .iter()
        .map(|(category, totals)| format_row(category, totals))
        .chain(std::iter::once(format_row("Total", &summary.total)))
        .chain(std::iter::once(format_row(
            "Subtotal for dairy",
            &summary.dairy_subtotal,
        )))
        .collect()
}
