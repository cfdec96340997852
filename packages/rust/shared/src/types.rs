//! Core domain types for the foodprint pipeline.
//!
//! The stage row structs double as the wire format: field order is the
//! column order of the persisted stage files, serialized by `serde`.

use serde::{Deserialize, Serialize};

/// Offset added to a ledger row's 0-based ordinal to produce the
/// human-facing spreadsheet row number (header row + 1-based indexing).
pub const SHEET_ROW_OFFSET: usize = 2;

/// Sentinel category for ingredients the resolver could not classify.
/// Never written to the persistent cache, so it is retried on a later run.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Minimum percent share an ingredient must have for its row to
/// participate in category-cache population.
pub const MATERIALITY_PERCENT: f64 = 6.0;

// ---------------------------------------------------------------------------
// ProductRow
// ---------------------------------------------------------------------------

/// One purchased product from the input worksheet. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    /// 0-based ordinal of the data row in the worksheet, assigned before
    /// any filtering. The stable identity carried through every stage.
    pub row_id: usize,
    /// Product name, commas stripped.
    pub product: String,
    /// Product weight; `None` when the cell was unparseable.
    pub weight: Option<f64>,
    /// Weight unit (e.g. "lbs", "kg", "gallons").
    pub unit: String,
    /// Item count; `Some(1)` when the worksheet has no qty column,
    /// `None` when the column exists but the cell is empty.
    pub qty: Option<i64>,
}

impl ProductRow {
    /// Human-facing spreadsheet row number for this product.
    pub fn sheet_index(&self) -> usize {
        self.row_id + SHEET_ROW_OFFSET
    }
}

// ---------------------------------------------------------------------------
// IngredientRow (stage-1 output)
// ---------------------------------------------------------------------------

/// One ingredient allocation of a product, with derived weights.
/// Created by the decomposer; never mutated after creation.
///
/// Columns: `index,product,ingredient,product_weight,unit,percent,
/// weight_ingredient,qty,lbs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientRow {
    /// Spreadsheet row number of the originating product.
    pub index: usize,
    pub product: String,
    /// Ingredient name, commas stripped.
    pub ingredient: String,
    pub product_weight: Option<f64>,
    pub unit: String,
    /// Nominal share of the product (assumed to sum to ~100, not enforced).
    pub percent: f64,
    /// `round(product_weight × percent/100, 4)`; 0 when weight is undefined.
    pub weight_ingredient: f64,
    pub qty: Option<i64>,
    /// Pounds-equivalent of `weight_ingredient`; 0 for unknown units.
    pub lbs: f64,
}

// ---------------------------------------------------------------------------
// CategorizedRow (stage-2 output)
// ---------------------------------------------------------------------------

/// An [`IngredientRow`] with its resolved category.
///
/// Columns: stage-1 columns with `category` inserted after `ingredient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedRow {
    pub index: usize,
    pub product: String,
    pub ingredient: String,
    pub category: String,
    pub product_weight: Option<f64>,
    pub unit: String,
    pub percent: f64,
    pub weight_ingredient: f64,
    pub qty: Option<i64>,
    pub lbs: f64,
}

impl CategorizedRow {
    /// Attach a resolved category to a stage-1 row. Commas are stripped
    /// from the category so it stays a single CSV cell downstream.
    pub fn from_ingredient(row: IngredientRow, category: &str) -> Self {
        Self {
            index: row.index,
            product: row.product,
            ingredient: row.ingredient,
            category: category.replace(',', ""),
            product_weight: row.product_weight,
            unit: row.unit,
            percent: row.percent,
            weight_ingredient: row.weight_ingredient,
            qty: row.qty,
            lbs: row.lbs,
        }
    }

    /// Whether this row's share meets the cache-population threshold.
    pub fn is_material(&self) -> bool {
        self.percent >= MATERIALITY_PERCENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_index_offsets_row_id() {
        let row = ProductRow {
            row_id: 0,
            product: "whole milk".into(),
            weight: Some(10.0),
            unit: "lbs".into(),
            qty: Some(1),
        };
        assert_eq!(row.sheet_index(), 2);
    }

    #[test]
    fn categorized_row_strips_category_commas() {
        let row = IngredientRow {
            index: 2,
            product: "granola".into(),
            ingredient: "oats".into(),
            product_weight: Some(5.0),
            unit: "lbs".into(),
            percent: 60.0,
            weight_ingredient: 3.0,
            qty: Some(1),
            lbs: 3.0,
        };
        let cat = CategorizedRow::from_ingredient(row, "oats, (oatmeal)");
        assert_eq!(cat.category, "oats (oatmeal)");
    }

    #[test]
    fn materiality_threshold_is_inclusive() {
        let mut row = CategorizedRow {
            index: 2,
            product: "p".into(),
            ingredient: "i".into(),
            category: "c".into(),
            product_weight: Some(1.0),
            unit: "lbs".into(),
            percent: 6.0,
            weight_ingredient: 0.06,
            qty: Some(1),
            lbs: 0.06,
        };
        assert!(row.is_material());
        row.percent = 5.9;
        assert!(!row.is_material());
    }

    #[test]
    fn ingredient_row_csv_roundtrip() {
        let row = IngredientRow {
            index: 7,
            product: "pineapple pizza".into(),
            ingredient: "wheat/rye (bread/pasta/baked goods)".into(),
            product_weight: Some(12.5),
            unit: "lbs".into(),
            percent: 55.0,
            weight_ingredient: 6.875,
            qty: None,
            lbs: 6.88,
        };

        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&row).expect("serialize");
        let data = String::from_utf8(writer.into_inner().expect("flush")).unwrap();

        // Column order is the stage-1 wire contract.
        assert!(data.starts_with(
            "index,product,ingredient,product_weight,unit,percent,weight_ingredient,qty,lbs"
        ));

        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let parsed: IngredientRow = reader.deserialize().next().expect("row").expect("parse");
        assert_eq!(parsed, row);
        assert_eq!(parsed.qty, None);
    }

    #[test]
    fn categorized_row_csv_header() {
        let row = CategorizedRow {
            index: 2,
            product: "p".into(),
            ingredient: "i".into(),
            category: "dairy milk".into(),
            product_weight: Some(1.0),
            unit: "lbs".into(),
            percent: 100.0,
            weight_ingredient: 1.0,
            qty: Some(1),
            lbs: 1.0,
        };

        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&row).expect("serialize");
        let data = String::from_utf8(writer.into_inner().expect("flush")).unwrap();
        assert!(data.starts_with(
            "index,product,ingredient,category,product_weight,unit,percent,weight_ingredient,qty,lbs"
        ));
    }
}
