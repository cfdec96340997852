//! Category resolution: normalized ingredient name → food-group category.
//!
//! Resolution is cache-first. Only ingredients from rows meeting the
//! materiality threshold are ever sent to the classifier; everything else
//! joins against whatever the cache already knows, falling back to the
//! `Unknown` sentinel. Resolved categories are merged into the cache
//! non-destructively after the pool drains, then the cache is persisted —
//! including after partial batches.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use foodprint_classifier::ClassifierClient;
use foodprint_shared::{
    CategorizedRow, FoodprintError, IngredientRow, MATERIALITY_PERCENT, Result, UNKNOWN_CATEGORY,
};
use foodprint_storage::CategoryCache;

/// The closed category vocabulary the classifier must answer from.
const CATEGORY_VOCABULARY: &[&str] = &[
    "fish (finfish)",
    "water",
    "dairy milk",
    "animal fats",
    "beef",
    "chicken",
    "duck",
    "eggs",
    "goat",
    "almond milk",
    "seaweed (dried)",
    "seaweed (fresh)",
    "lamb/mutton",
    "pork",
    "turkey",
    "unidentified meat",
    "veal",
    "butter",
    "buttermilk",
    "dairy cheese",
    "non-dairy cheese or yogurt",
    "apples",
    "bananas",
    "barley (beer)",
    "beans and pulses (dried)",
    "berries",
    "cabbages and other brassicas (broccoli)",
    "concentrated milk",
    "cream",
    "flavoring",
    "ghee",
    "ice cream",
    "cassava and other roots",
    "citrus fruit",
    "cocoa",
    "coffee",
    "lactose powder",
    "low fat yogurt",
    "milk powder",
    "skim milk",
    "corn (maize)",
    "fruits",
    "grains/cereals (except rice)",
    "whey powder",
    "yogurt",
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
    "additive",
    "unknown",
    "bivalves",
    "catfish",
    "milkfish",
    "carp",
    "salmon",
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
];

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*?\)").expect("parenthetical pattern should compile"));

/// Normalize an ingredient name for cache keying and lookup:
/// trim, lower-case, strip parenthetical substrings.
pub fn normalize_ingredient(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    PARENTHETICAL.replace_all(&lowered, "").trim().to_string()
}

/// Build the category-resolution prompt for one ingredient.
fn categorize_prompt(ingredient: &str) -> String {
    format!(
        "You are a food scientist with expertise in identifying food categories. \
         I have a list of food ingredients. One ingredient is '{ingredient}'. \
         Your task is to identify the category that this ingredient most likely \
         belongs to from the following list: {vocabulary}. \
         Important: For ingredients like herbs, chili peppers, and garlic, please \
         categorize them as 'other vegetables' rather than 'stimulants & spices'. \
         Select only one category from the list that matches the ingredient exactly. \
         Do not ever provide a response that is not in this list or that includes \
         multiple categories. Be sure to include any parenthetical expression. \
         When multiple options are correct, choose the most exact category match, \
         rather than a more generic category. \
         Except if the ingredient is a baked good, like a cake, pie, cookie or brownie \
         then choose 'wheat/rye (bread/pasta/baked goods)' rather than an ingredient \
         like cocoa or berries. \
         Return the result in JSON format with the schema: {{'category': 'your_selected_category'}}. \
         Ensure the selected category matches exactly one item from the list.",
        vocabulary = CATEGORY_VOCABULARY.join(", ")
    )
}

/// Resolve one ingredient to a category via the classifier.
///
/// A schema-conforming response yields its category string; a malformed or
/// non-JSON response resolves to [`UNKNOWN_CATEGORY`], which the caller
/// must not cache.
pub async fn resolve_category(
    client: &ClassifierClient,
    model: &str,
    ingredient: &str,
) -> Result<String> {
    let response = match client
        .classify(model, None, &categorize_prompt(ingredient))
        .await
    {
        Ok(value) => value,
        Err(e) if e.is_rate_limit() => return Err(e),
        Err(FoodprintError::Classify(reason)) => {
            warn!(ingredient, reason = %reason, "malformed category response, resolving to Unknown");
            return Ok(UNKNOWN_CATEGORY.to_string());
        }
        Err(e) => return Err(e),
    };

    match response.get("category").and_then(|v| v.as_str()) {
        Some(category) if !category.trim().is_empty() => Ok(category.trim().to_string()),
        _ => {
            warn!(ingredient, %response, "category field missing, resolving to Unknown");
            Ok(UNKNOWN_CATEGORY.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Batch resolution
// ---------------------------------------------------------------------------

/// Result of a batch category resolution.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    /// New cache entries added by this batch.
    pub resolved: usize,
    /// Ingredients that ended up as `Unknown` (not cached, retried later).
    pub unresolved: usize,
    /// Ingredients answered directly from the cache.
    pub cache_hits: usize,
}

/// Resolve categories for every material ingredient not already cached,
/// across a bounded worker pool, then merge and persist the cache.
///
/// Per-ingredient failures are isolated: the ingredient stays unresolved
/// (and uncached) while the rest of the batch proceeds, and whatever was
/// resolved is still flushed.
pub async fn resolve_categories(
    rows: &[IngredientRow],
    cache: &mut CategoryCache,
    client: &ClassifierClient,
    model: &str,
    concurrency: usize,
) -> Result<ResolveOutcome> {
    let material: BTreeSet<String> = rows
        .iter()
        .filter(|r| r.percent >= MATERIALITY_PERCENT)
        .map(|r| normalize_ingredient(&r.ingredient))
        .filter(|name| !name.is_empty())
        .collect();

    let cache_hits = material.iter().filter(|name| cache.contains(name)).count();
    let pending: Vec<String> = material
        .into_iter()
        .filter(|name| !cache.contains(name))
        .collect();

    info!(
        pending = pending.len(),
        cache_hits, concurrency, "categorizing ingredients"
    );

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(pending.len());

    for ingredient in pending.iter().cloned() {
        let client = client.clone();
        let model = model.to_string();
        let sem = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let category = resolve_category(&client, &model, &ingredient).await;
            (ingredient, category)
        }));
    }

    // Collect into local results first; the cache is merged and persisted
    // single-threaded after the pool drains.
    let mut resolved: Vec<(String, String)> = Vec::new();
    let mut unresolved = 0usize;

    for handle in handles {
        match handle.await {
            Ok((ingredient, Ok(category))) => {
                if category == UNKNOWN_CATEGORY {
                    // Not cached, so a future run retries it.
                    unresolved += 1;
                } else {
                    resolved.push((ingredient, category));
                }
            }
            Ok((ingredient, Err(e))) => {
                warn!(ingredient = %ingredient, error = %e, "category resolution failed");
                unresolved += 1;
            }
            Err(e) => {
                warn!(error = %e, "category resolution task panicked");
                unresolved += 1;
            }
        }
    }

    let added = cache.merge(resolved);
    cache.persist()?;

    info!(added, unresolved, cache_hits, "category resolution complete");

    Ok(ResolveOutcome {
        resolved: added,
        unresolved,
        cache_hits,
    })
}

/// Join stage-1 rows against the cache. Every row is carried forward:
/// a cache hit supplies its category, anything else becomes `Unknown`.
pub fn categorize_rows(rows: Vec<IngredientRow>, cache: &CategoryCache) -> Vec<CategorizedRow> {
    rows.into_iter()
        .map(|row| {
            let category = cache
                .get(&normalize_ingredient(&row.ingredient))
                .unwrap_or(UNKNOWN_CATEGORY)
                .to_string();
            CategorizedRow::from_ingredient(row, &category)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    fn temp_cache_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!(
                "fp-categorize-test-{tag}-{}-{:?}",
                std::process::id(),
                std::thread::current().id()
            ))
            .join("foodcategories.json")
    }

    fn ingredient_row(ingredient: &str, percent: f64) -> IngredientRow {
        IngredientRow {
            index: 2,
            product: "test product".into(),
            ingredient: ingredient.into(),
            product_weight: Some(10.0),
            unit: "lbs".into(),
            percent,
            weight_ingredient: 10.0 * percent / 100.0,
            qty: Some(1),
            lbs: 10.0 * percent / 100.0,
        }
    }

    #[test]
    fn normalize_strips_case_whitespace_and_parentheses() {
        assert_eq!(normalize_ingredient("  Olives (oil)  "), "olives");
        assert_eq!(normalize_ingredient("Soybeans/Tofu"), "soybeans/tofu");
        assert_eq!(
            normalize_ingredient("wheat/rye (bread/pasta/baked goods)"),
            "wheat/rye"
        );
        assert_eq!(normalize_ingredient("CREAM"), "cream");
    }

    #[test]
    fn prompt_includes_tie_break_rules() {
        let prompt = categorize_prompt("garlic");
        assert!(prompt.contains("'garlic'"));
        assert!(prompt.contains("other vegetables"));
        assert!(prompt.contains("stimulants & spices"));
        assert!(prompt.contains("wheat/rye (bread/pasta/baked goods)"));
        assert!(prompt.contains("{'category': 'your_selected_category'}"));
    }

    #[tokio::test]
    async fn resolve_category_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(r#"{"category": "dairy cheese"}"#)),
            )
            .mount(&server)
            .await;

        let client = ClassifierClient::from_parts(&server.uri(), "test-key", 0).unwrap();
        let category = resolve_category(&client, "gpt-4o-mini", "mozzarella")
            .await
            .unwrap();
        assert_eq!(category, "dairy cheese");
    }

    #[tokio::test]
    async fn malformed_response_resolves_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("it is probably cheese of some kind")),
            )
            .mount(&server)
            .await;

        let client = ClassifierClient::from_parts(&server.uri(), "test-key", 0).unwrap();
        let category = resolve_category(&client, "gpt-4o-mini", "mystery paste")
            .await
            .unwrap();
        assert_eq!(category, UNKNOWN_CATEGORY);
    }

    #[tokio::test]
    async fn resolve_categories_skips_cached_and_sub_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(r#"{"category": "tomatoes"}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache_path = temp_cache_path("skip");
        let mut cache = CategoryCache::load(&cache_path).unwrap();
        cache.insert_if_absent("mozzarella".into(), "dairy cheese".into());

        let rows = vec![
            ingredient_row("Mozzarella", 40.0),     // cached
            ingredient_row("tomato (fresh)", 55.0), // pending
            ingredient_row("oregano", 5.0),         // sub-threshold, never classified
        ];

        let client = ClassifierClient::from_parts(&server.uri(), "test-key", 0).unwrap();
        let outcome = resolve_categories(&rows, &mut cache, &client, "gpt-4o-mini", 4)
            .await
            .unwrap();

        assert_eq!(outcome.cache_hits, 1);
        assert_eq!(outcome.resolved, 1);
        assert_eq!(outcome.unresolved, 0);
        assert_eq!(cache.get("tomato"), Some("tomatoes"));
        assert!(!cache.contains("oregano"));

        let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
    }

    #[tokio::test]
    async fn unknown_is_not_cached_but_rows_still_join() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("not json")))
            .mount(&server)
            .await;

        let cache_path = temp_cache_path("unknown");
        let mut cache = CategoryCache::load(&cache_path).unwrap();

        let rows = vec![ingredient_row("mystery paste", 80.0)];
        let client = ClassifierClient::from_parts(&server.uri(), "test-key", 0).unwrap();
        let outcome = resolve_categories(&rows, &mut cache, &client, "gpt-4o-mini", 2)
            .await
            .unwrap();

        assert_eq!(outcome.resolved, 0);
        assert_eq!(outcome.unresolved, 1);
        assert!(!cache.contains("mystery paste"));

        let categorized = categorize_rows(rows, &cache);
        assert_eq!(categorized[0].category, UNKNOWN_CATEGORY);

        let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
    }

    #[tokio::test]
    async fn cache_survives_conflicting_reclassification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(r#"{"category": "legumes"}"#)),
            )
            .mount(&server)
            .await;

        let cache_path = temp_cache_path("monotonic");
        let mut cache = CategoryCache::load(&cache_path).unwrap();
        cache.insert_if_absent("tofu".into(), "soybeans/tofu".into());
        // "tofu (firm)" normalizes to the already-cached key.
        let rows = vec![ingredient_row("tofu (firm)", 100.0)];

        let client = ClassifierClient::from_parts(&server.uri(), "test-key", 0).unwrap();
        resolve_categories(&rows, &mut cache, &client, "gpt-4o-mini", 2)
            .await
            .unwrap();

        // "tofu (firm)" normalizes to "tofu", which is already cached: the
        // conflicting mock answer never reaches the cache.
        assert_eq!(cache.get("tofu"), Some("soybeans/tofu"));

        let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
    }

    #[test]
    fn categorize_rows_carries_all_rows_forward() {
        let cache_path = temp_cache_path("join");
        let mut cache = CategoryCache::load(&cache_path).unwrap();
        cache.insert_if_absent("dairy milk".into(), "dairy milk".into());

        let rows = vec![
            ingredient_row("dairy milk", 100.0),
            ingredient_row("fairy dust", 3.0),
        ];
        let categorized = categorize_rows(rows, &cache);

        assert_eq!(categorized.len(), 2);
        assert_eq!(categorized[0].category, "dairy milk");
        assert_eq!(categorized[1].category, UNKNOWN_CATEGORY);
    }
}
