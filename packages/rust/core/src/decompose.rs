//! Ingredient decomposition: product name → weighted ingredient set.
//!
//! A product is first scanned for whole-word matches against the
//! prioritized ingredient vocabulary; any hit short-circuits the external
//! classifier and the matched names are taken at 100% each. Only products
//! with no prioritized match are sent to the classifier.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use foodprint_classifier::ClassifierClient;
use foodprint_shared::{IngredientRow, ProductRow, Result};

use crate::units;

/// System framing for decomposition calls.
const DECOMPOSE_SYSTEM: &str =
    "You are a food scientist and you know the formulation of common products";

/// Canonical ingredient names recognized directly in product names.
/// A whole-word hit takes the whole product at 100% without consulting
/// the classifier.
const PRIORITIZED_INGREDIENTS: &[&str] = &[
    "animal fats",
    "beef",
    "chicken",
    "duck",
    "eggs",
    "goat",
    "lamb/mutton",
    "pork",
    "turkey",
    "unidentified meat",
    "veal",
    "dairy milk",
    "butter",
    "buttermilk",
    "dairy cheese",
    "concentrated milk",
    "cream",
    "ghee",
    "ice cream",
    "lactose powder",
    "low fat yogurt",
    "milk powder",
    "skim milk",
    "whey powder",
    "yogurt",
    "almond milk",
    "apples",
    "bananas",
    "barley (beer)",
    "beans and pulses (dried)",
    "berries",
    "cabbages and other brassicas (broccoli)",
    "cassava and other roots",
    "citrus fruit",
    "cocoa",
    "coffee",
    "corn (maize)",
    "fruits",
    "grains/cereals (except rice)",
    "legumes",
    "oat milk",
    "oats (oatmeal)",
    "olives (oil)",
    "onions and leeks",
    "other vegetables",
    "palm (oil)",
    "peanuts/groundnuts",
    "peas",
    "potatoes",
    "rapeseed/canola (oil)",
    "rice",
    "rice milk",
    "root vegetables",
    "roots and tubers",
    "soy milk",
    "soybeans (oil)",
    "soybeans/tofu",
    "stimulants & spices",
    "sugars and sweeteners",
    "sunflower (oil)",
    "tomatoes",
    "tree nuts and seeds",
    "vegetable oils",
    "wheat/rye (bread/pasta/baked goods)",
    "wine grapes (wine)",
    "non-dairy cheese or yogurt",
    "water",
    "unknown",
    "flavoring",
    "additive",
    "seaweed (dried)",
    "seaweed (fresh)",
    "bivalves",
    "catfish",
    "milkfish",
    "carp",
    "shrimp",
    "silver or bighead carp",
    "tilapia",
    "trout",
    "anchovies",
    "bass",
    "billfish",
    "bluefin tuna",
    "bonitos",
    "cod",
    "congers",
    "flounder",
    "haddock",
    "hake",
    "halibut",
    "herring",
    "jacks",
    "lobster",
    "mullets",
    "redfish",
    "sardines",
    "sauries",
    "tuna",
    "smelt",
    "sole",
    "squid or cuttlefish or octopus",
    "crab",
    "fish (finfish)",
    "salmon",
];

/// Spelling aliases resolved to their canonical vocabulary name before
/// matching. Kept narrow: only spellings that are unambiguous on their own
/// ("milk" alone is not, "whole milk" is).
const INGREDIENT_ALIASES: &[(&str, &str)] = &[
    ("whole milk", "dairy milk"),
    ("2% milk", "dairy milk"),
    ("1% milk", "dairy milk"),
];

/// Whole-word, case-insensitive matchers for canonical names and aliases,
/// compiled once. Each pattern carries the canonical name it resolves to.
static PRIORITIZED_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    let compile = |spelling: &str| {
        let pattern = format!(r"\b{}\b", regex::escape(spelling));
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .expect("prioritized ingredient pattern should compile")
    };

    PRIORITIZED_INGREDIENTS
        .iter()
        .map(|name| (*name, compile(name)))
        .chain(
            INGREDIENT_ALIASES
                .iter()
                .map(|(alias, canonical)| (*canonical, compile(alias))),
        )
        .collect()
});

/// Scan a product name for prioritized ingredients. Every match is
/// returned at 100% — multiple matches all receive 100%, and the
/// percentages are deliberately not normalized.
pub fn keyword_matches(product: &str) -> BTreeMap<String, f64> {
    PRIORITIZED_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(product))
        .map(|(name, _)| ((*name).to_string(), 100.0))
        .collect()
}

/// Build the decomposition prompt for one purchased item.
fn decompose_prompt(item: &str) -> String {
    format!(
        "I have list of food purchases from a University in a large excel file. \
         One item is listed as '{item}' \
         I would like you to very concisely list the major ingredients of this item \
         and the relative percentages. \
         List only the major ingredients and the sum of the percentages should be 100%. \
         Do not list water as an ingredient of a dairy product. \
         If the item is dairy milk, butter, cheese, or ice cream, do not separate the \
         product into separate ingredients \
         Just specify that the only ingredient is 100% dairy milk, butter or cheese or ice cream. \
         If a product is vegan, do not specify any animal products as ingredients. \
         For example if the item is labeled as vegan yogurt, specify non-dairy milk or \
         non-dairy yogurt as an ingredient, not yogurt. \
         Please give your answer in json. Output the JSON only. \
         Json schema {{'ingredient name': Percentage}}"
    )
}

/// Decompose one product into (ingredient, percent) pairs.
///
/// Classifier-sourced entries whose percent is neither a JSON number nor a
/// numeric string are discarded silently.
pub async fn decompose_product(
    client: &ClassifierClient,
    model: &str,
    product: &str,
) -> Result<Vec<(String, f64)>> {
    let known = keyword_matches(product);
    if !known.is_empty() {
        return Ok(known.into_iter().collect());
    }

    let response = client
        .classify(model, Some(DECOMPOSE_SYSTEM), &decompose_prompt(product))
        .await?;

    let object = response
        .as_object()
        .expect("classify returns a JSON object");

    let mut pairs = Vec::with_capacity(object.len());
    for (ingredient, percent) in object {
        let Some(percent) = numeric_percent(percent) else {
            continue;
        };
        pairs.push((ingredient.replace(',', ""), percent));
    }
    Ok(pairs)
}

/// Accept a JSON number or a numeric string (classifiers emit both).
fn numeric_percent(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Batch decomposition
// ---------------------------------------------------------------------------

/// Result of decomposing a full ledger.
#[derive(Debug)]
pub struct DecomposeOutcome {
    /// Allocation rows, sorted by spreadsheet index.
    pub rows: Vec<IngredientRow>,
    /// Products whose decomposition failed and were omitted.
    pub skipped: usize,
}

/// Decompose every ledger row across a bounded worker pool.
///
/// Each row is an independent unit of work; a failure is logged with the
/// offending row and omitted without aborting the batch. Completion order
/// is unconstrained, so results are re-sorted by spreadsheet index before
/// being handed back.
pub async fn decompose_ledger(
    products: &[ProductRow],
    client: &ClassifierClient,
    model: &str,
    concurrency: usize,
) -> DecomposeOutcome {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(products.len());

    info!(
        products = products.len(),
        concurrency, "starting ingredient decomposition"
    );

    for product in products.iter().cloned() {
        let client = client.clone();
        let model = model.to_string();
        let sem = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let pairs = decompose_product(&client, &model, &product.product).await?;
            Ok::<_, foodprint_shared::FoodprintError>(allocation_rows(&product, pairs))
        }));
    }

    let mut rows: Vec<IngredientRow> = Vec::new();
    let mut skipped = 0usize;

    for (handle, product) in handles.into_iter().zip(products) {
        match handle.await {
            Ok(Ok(product_rows)) => rows.extend(product_rows),
            Ok(Err(e)) => {
                warn!(
                    index = product.sheet_index(),
                    product = %product.product,
                    error = %e,
                    "decomposition failed, row omitted"
                );
                skipped += 1;
            }
            Err(e) => {
                warn!(
                    index = product.sheet_index(),
                    product = %product.product,
                    error = %e,
                    "decomposition task panicked, row omitted"
                );
                skipped += 1;
            }
        }
    }

    rows.sort_by_key(|r| r.index);

    info!(
        allocations = rows.len(),
        skipped, "ingredient decomposition complete"
    );

    DecomposeOutcome { rows, skipped }
}

/// Turn (ingredient, percent) pairs into stage-1 rows for one product.
///
/// `weight_ingredient = round(weight × percent/100, 4)`, defaulting to 0
/// when the product weight was unparseable; `lbs` goes through the unit
/// converter and is 0 for unrecognized units.
fn allocation_rows(product: &ProductRow, pairs: Vec<(String, f64)>) -> Vec<IngredientRow> {
    pairs
        .into_iter()
        .map(|(ingredient, percent)| {
            let weight_ingredient = match product.weight {
                Some(weight) => units::round_dp(weight * (percent / 100.0), 4),
                None => 0.0,
            };
            IngredientRow {
                index: product.sheet_index(),
                product: product.product.clone(),
                ingredient,
                product_weight: product.weight,
                unit: product.unit.clone(),
                percent,
                weight_ingredient,
                qty: product.qty,
                lbs: units::to_pounds(weight_ingredient, &product.unit),
            }
        })
        .collect()
}
