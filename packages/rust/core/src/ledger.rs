//! Worksheet and stage-file tabular I/O.
//!
//! The input worksheet needs `product`, `product_weight`, and `unit`
//! columns (a missing header is fatal); `qty` is optional. Stage files are
//! the pipeline's wire format: complete, self-describing CSVs written
//! atomically so a crashed run never leaves a corrupt hand-off behind.
//!
//! Stage readers parse numeric cells leniently — a non-numeric cell
//! becomes the safe default rather than failing the run.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use foodprint_shared::{CategorizedRow, FoodprintError, IngredientRow, ProductRow, Result};

// ---------------------------------------------------------------------------
// Input worksheet
// ---------------------------------------------------------------------------

/// Read the purchase ledger from `path`.
///
/// Rows with an empty product are dropped (their row ids are still
/// consumed, so surviving rows keep their spreadsheet positions). Commas
/// are stripped from product names. When more than half of the ledger's
/// unit cells are empty, empty units default to `"lbs"`; otherwise they
/// stay empty and later zero out through the unknown-unit policy.
pub fn read_ledger(path: &Path) -> Result<Vec<ProductRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| FoodprintError::io(path, std::io::Error::other(e)))?;

    let headers = header_map(&mut reader, path)?;
    let product_col = require_column(&headers, "product", path)?;
    let weight_col = require_column(&headers, "product_weight", path)?;
    let unit_col = require_column(&headers, "unit", path)?;
    let qty_col = headers.get("qty").copied();

    struct RawRow {
        row_id: usize,
        product: String,
        weight: Option<f64>,
        unit: String,
        qty: Option<i64>,
    }

    let mut raw: Vec<RawRow> = Vec::new();
    let mut missing_units = 0usize;
    let mut total = 0usize;

    for (row_id, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            FoodprintError::parse(format!("{}: row {}: {e}", path.display(), row_id + 2))
        })?;
        total += 1;

        let product = cell(&record, product_col).replace(',', "").trim().to_string();
        if product.is_empty() {
            continue;
        }

        let weight_cell = cell(&record, weight_col);
        let weight = match weight_cell.trim().parse::<f64>() {
            Ok(w) => Some(w),
            Err(_) => {
                if !weight_cell.trim().is_empty() {
                    warn!(row = row_id + 2, value = weight_cell, "unparseable product weight");
                }
                None
            }
        };

        let unit = cell(&record, unit_col).trim().to_string();
        if unit.is_empty() {
            missing_units += 1;
        }

        let qty = match qty_col {
            // No qty column at all: every item counts once.
            None => Some(1),
            Some(col) => cell(&record, col).trim().parse::<i64>().ok(),
        };

        raw.push(RawRow {
            row_id,
            product,
            weight,
            unit,
            qty,
        });
    }

    let default_units = missing_units > total / 2;
    if default_units {
        info!(
            missing = missing_units,
            total, "majority of unit cells are empty, defaulting them to lbs"
        );
    }

    let rows: Vec<ProductRow> = raw
        .into_iter()
        .map(|r| ProductRow {
            row_id: r.row_id,
            product: r.product,
            weight: r.weight,
            unit: if r.unit.is_empty() && default_units {
                "lbs".to_string()
            } else {
                r.unit
            },
            qty: r.qty,
        })
        .collect();

    info!(path = %path.display(), products = rows.len(), "ledger loaded");
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Stage files
// ---------------------------------------------------------------------------

/// Write stage-1 rows (`index,product,ingredient,product_weight,unit,
/// percent,weight_ingredient,qty,lbs`) atomically.
pub fn write_ingredient_rows(path: &Path, rows: &[IngredientRow]) -> Result<()> {
    write_atomic(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in rows {
            csv_writer
                .serialize(row)
                .map_err(|e| FoodprintError::parse(format!("serialize stage-1 row: {e}")))?;
        }
        csv_writer
            .flush()
            .map_err(|e| FoodprintError::io(path, e))?;
        Ok(())
    })
}

/// Write stage-2 rows (stage-1 columns with `category` after `ingredient`)
/// atomically.
pub fn write_categorized_rows(path: &Path, rows: &[CategorizedRow]) -> Result<()> {
    write_atomic(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in rows {
            csv_writer
                .serialize(row)
                .map_err(|e| FoodprintError::parse(format!("serialize stage-2 row: {e}")))?;
        }
        csv_writer
            .flush()
            .map_err(|e| FoodprintError::io(path, e))?;
        Ok(())
    })
}

/// Write a formatted summary table (header + pre-formatted string cells)
/// atomically.
pub fn write_formatted_table(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    write_atomic(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record(header)
            .map_err(|e| FoodprintError::parse(format!("write summary header: {e}")))?;
        for row in rows {
            csv_writer
                .write_record(row)
                .map_err(|e| FoodprintError::parse(format!("write summary row: {e}")))?;
        }
        csv_writer
            .flush()
            .map_err(|e| FoodprintError::io(path, e))?;
        Ok(())
    })
}

/// Read stage-1 rows back, coercing malformed numeric cells to defaults.
pub fn read_ingredient_rows(path: &Path) -> Result<Vec<IngredientRow>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| FoodprintError::io(path, std::io::Error::other(e)))?;
    let headers = header_map(&mut reader, path)?;

    let col = |name: &str| require_column(&headers, name, path);
    let (index, product, ingredient) = (col("index")?, col("product")?, col("ingredient")?);
    let (product_weight, unit, percent) = (col("product_weight")?, col("unit")?, col("percent")?);
    let (weight_ingredient, qty, lbs) = (col("weight_ingredient")?, col("qty")?, col("lbs")?);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| FoodprintError::parse(format!("{}: {e}", path.display())))?;
        rows.push(IngredientRow {
            index: cell(&record, index).trim().parse().unwrap_or(0),
            product: cell(&record, product).to_string(),
            ingredient: cell(&record, ingredient).to_string(),
            product_weight: cell(&record, product_weight).trim().parse().ok(),
            unit: cell(&record, unit).to_string(),
            percent: cell(&record, percent).trim().parse().unwrap_or(0.0),
            weight_ingredient: cell(&record, weight_ingredient).trim().parse().unwrap_or(0.0),
            qty: cell(&record, qty).trim().parse().ok(),
            lbs: cell(&record, lbs).trim().parse().unwrap_or(0.0),
        });
    }
    Ok(rows)
}

/// Read stage-2 rows back, coercing malformed numeric cells to defaults.
pub fn read_categorized_rows(path: &Path) -> Result<Vec<CategorizedRow>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| FoodprintError::io(path, std::io::Error::other(e)))?;
    let headers = header_map(&mut reader, path)?;

    let col = |name: &str| require_column(&headers, name, path);
    let (index, product, ingredient, category) =
        (col("index")?, col("product")?, col("ingredient")?, col("category")?);
    let (product_weight, unit, percent) = (col("product_weight")?, col("unit")?, col("percent")?);
    let (weight_ingredient, qty, lbs) = (col("weight_ingredient")?, col("qty")?, col("lbs")?);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| FoodprintError::parse(format!("{}: {e}", path.display())))?;
        rows.push(CategorizedRow {
            index: cell(&record, index).trim().parse().unwrap_or(0),
            product: cell(&record, product).to_string(),
            ingredient: cell(&record, ingredient).to_string(),
            category: cell(&record, category).to_string(),
            product_weight: cell(&record, product_weight).trim().parse().ok(),
            unit: cell(&record, unit).to_string(),
            percent: cell(&record, percent).trim().parse().unwrap_or(0.0),
            weight_ingredient: cell(&record, weight_ingredient).trim().parse().unwrap_or(0.0),
            qty: cell(&record, qty).trim().parse().ok(),
            lbs: cell(&record, lbs).trim().parse().unwrap_or(0.0),
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Full in-memory computation first, then temp file + rename.
fn write_atomic(
    path: &Path,
    write_fn: impl FnOnce(&mut Vec<u8>) -> Result<()>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| FoodprintError::io(parent, e))?;
        }
    }

    let mut buffer = Vec::new();
    write_fn(&mut buffer)?;

    let temp = path.with_extension("csv.tmp");
    std::fs::write(&temp, &buffer).map_err(|e| FoodprintError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| FoodprintError::io(path, e))?;
    Ok(())
}

fn header_map(
    reader: &mut csv::Reader<impl std::io::Read>,
    path: &Path,
) -> Result<HashMap<String, usize>> {
    let headers = reader
        .headers()
        .map_err(|e| FoodprintError::parse(format!("{}: bad header row: {e}", path.display())))?;
    Ok(headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_string(), i))
        .collect())
}

fn require_column(headers: &HashMap<String, usize>, name: &str, path: &Path) -> Result<usize> {
    headers.get(name).copied().ok_or_else(|| {
        FoodprintError::validation(format!(
            "{}: missing required column '{name}'",
            path.display()
        ))
    })
}

fn cell<'a>(record: &'a csv::StringRecord, col: usize) -> &'a str {
    record.get(col).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fp-ledger-test-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_worksheet(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("worksheet_in.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn read_ledger_basic() {
        let dir = temp_dir("basic");
        let path = write_worksheet(
            &dir,
            "product,product_weight,unit,qty\n\
             whole milk,10,lbs,1\n\
             cheddar cheese,5,kg,2\n",
        );

        let rows = read_ledger(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product, "whole milk");
        assert_eq!(rows[0].weight, Some(10.0));
        assert_eq!(rows[0].sheet_index(), 2);
        assert_eq!(rows[1].unit, "kg");
        assert_eq!(rows[1].qty, Some(2));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_ledger_strips_commas_and_drops_empty_products() {
        let dir = temp_dir("commas");
        let path = write_worksheet(
            &dir,
            "product,product_weight,unit\n\
             \"beans, black\",4,lbs\n\
             ,3,lbs\n\
             rice,2,lbs\n",
        );

        let rows = read_ledger(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product, "beans black");
        // The dropped row still consumed row_id 1.
        assert_eq!(rows[1].row_id, 2);
        assert_eq!(rows[1].sheet_index(), 4);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_ledger_defaults_units_when_majority_absent() {
        let dir = temp_dir("units");
        let path = write_worksheet(
            &dir,
            "product,product_weight,unit\n\
             milk,10,\n\
             bread,2,\n\
             apples,3,kg\n",
        );

        let rows = read_ledger(&path).unwrap();
        assert_eq!(rows[0].unit, "lbs");
        assert_eq!(rows[1].unit, "lbs");
        assert_eq!(rows[2].unit, "kg");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_ledger_keeps_minority_missing_units_empty() {
        let dir = temp_dir("units-minority");
        let path = write_worksheet(
            &dir,
            "product,product_weight,unit\n\
             milk,10,lbs\n\
             bread,2,lbs\n\
             apples,3,\n",
        );

        let rows = read_ledger(&path).unwrap();
        assert_eq!(rows[2].unit, "");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_ledger_defaults_qty_when_column_absent() {
        let dir = temp_dir("qty");
        let path = write_worksheet(&dir, "product,product_weight,unit\nmilk,10,lbs\n");

        let rows = read_ledger(&path).unwrap();
        assert_eq!(rows[0].qty, Some(1));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_ledger_unparseable_weight_is_none() {
        let dir = temp_dir("weight");
        let path = write_worksheet(
            &dir,
            "product,product_weight,unit\nmilk,ten pounds,lbs\nbread,2.5,lbs\n",
        );

        let rows = read_ledger(&path).unwrap();
        assert_eq!(rows[0].weight, None);
        assert_eq!(rows[1].weight, Some(2.5));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_ledger_missing_required_column_is_fatal() {
        let dir = temp_dir("missing-col");
        let path = write_worksheet(&dir, "item,weight\nmilk,10\n");

        let err = read_ledger(&path).unwrap_err();
        assert!(err.to_string().contains("missing required column 'product'"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stage1_roundtrip_preserves_rows() {
        let dir = temp_dir("stage1");
        let path = dir.join("impacts1_lbs.csv");

        let rows = vec![
            IngredientRow {
                index: 2,
                product: "whole milk".into(),
                ingredient: "dairy milk".into(),
                product_weight: Some(10.0),
                unit: "lbs".into(),
                percent: 100.0,
                weight_ingredient: 10.0,
                qty: Some(1),
                lbs: 10.0,
            },
            IngredientRow {
                index: 3,
                product: "mystery".into(),
                ingredient: "unknown".into(),
                product_weight: None,
                unit: "".into(),
                percent: 100.0,
                weight_ingredient: 0.0,
                qty: None,
                lbs: 0.0,
            },
        ];

        write_ingredient_rows(&path, &rows).unwrap();
        let read_back = read_ingredient_rows(&path).unwrap();
        assert_eq!(read_back, rows);

        // No temp files left behind by the atomic write.
        for entry in std::fs::read_dir(&dir).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.ends_with(".tmp"), "temp file left behind: {name}");
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stage2_reader_coerces_bad_numeric_cells() {
        let dir = temp_dir("stage2-coerce");
        let path = dir.join("impacts2_lbs.csv");
        std::fs::write(
            &path,
            "index,product,ingredient,category,product_weight,unit,percent,weight_ingredient,qty,lbs\n\
             2,milk,dairy milk,dairy milk,10,lbs,100,10,1,not-a-number\n",
        )
        .unwrap();

        let rows = read_categorized_rows(&path).unwrap();
        assert_eq!(rows[0].lbs, 0.0);
        assert_eq!(rows[0].percent, 100.0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
