//! End-to-end pipeline: ledger → decompose → categorize → impact summary.
//!
//! The orchestrator sequences the three stages through their persisted
//! hand-off files, so each stage is also independently re-runnable from
//! its predecessor's output. Stage files are written atomically after the
//! full in-memory computation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument};

use foodprint_classifier::ClassifierClient;
use foodprint_shared::{ClassifyConfig, Result, UNKNOWN_CATEGORY};
use foodprint_storage::CategoryCache;

use crate::categorize;
use crate::decompose;
use crate::impact;
use crate::ledger;

/// Stage-1 hand-off file name (ingredient allocations, lbs-normalized).
pub const STAGE1_FILE: &str = "impacts1done_lbs.csv";
/// Stage-2 hand-off file name (categorized allocations).
pub const STAGE2_FILE: &str = "impacts2done_lbs.csv";
/// Imperial summary file name.
pub const IMPACTS_LBS_FILE: &str = "impacts3_lbs.csv";
/// Metric summary file name.
pub const IMPACTS_METRIC_FILE: &str = "impacts3_metric.csv";

// ---------------------------------------------------------------------------
// Configuration and reporting
// ---------------------------------------------------------------------------

/// Configuration for a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input worksheet path.
    pub input: PathBuf,
    /// Directory for stage files and summaries.
    pub output_dir: PathBuf,
    /// Conversion-factor table path.
    pub factors: PathBuf,
    /// Persistent category cache path.
    pub cache: PathBuf,
    /// Classification runtime settings.
    pub classify: ClassifyConfig,
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Products read from the worksheet.
    pub products: usize,
    /// Ingredient allocations produced.
    pub allocations: usize,
    /// Products skipped because decomposition failed.
    pub skipped_products: usize,
    /// New category-cache entries added.
    pub resolved: usize,
    /// Ingredients left unresolved (categorized as `Unknown`).
    pub unresolved: usize,
    /// Stage-2 rows that joined as `Unknown`.
    pub unknown_rows: usize,
    /// Files written by the run.
    pub outputs: Vec<PathBuf>,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Stage entry points
// ---------------------------------------------------------------------------

/// Report from the decomposition stage.
#[derive(Debug)]
pub struct DecomposeReport {
    pub products: usize,
    pub allocations: usize,
    pub skipped: usize,
    pub output: PathBuf,
}

/// Stage 1: read the worksheet, decompose every product, write the sorted
/// allocation rows.
#[instrument(skip_all, fields(input = %input.display()))]
pub async fn decompose_stage(
    input: &Path,
    output: &Path,
    client: &ClassifierClient,
    classify: &ClassifyConfig,
) -> Result<DecomposeReport> {
    let products = ledger::read_ledger(input)?;
    let outcome = decompose::decompose_ledger(
        &products,
        client,
        &classify.decompose_model,
        classify.decompose_concurrency as usize,
    )
    .await;

    ledger::write_ingredient_rows(output, &outcome.rows)?;
    info!(path = %output.display(), rows = outcome.rows.len(), "stage 1 written");

    Ok(DecomposeReport {
        products: products.len(),
        allocations: outcome.rows.len(),
        skipped: outcome.skipped,
        output: output.to_path_buf(),
    })
}

/// Report from the categorization stage.
#[derive(Debug)]
pub struct CategorizeReport {
    pub rows: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub cache_hits: usize,
    pub unknown_rows: usize,
    pub output: PathBuf,
}

/// Stage 2: resolve categories for material ingredients (cache first,
/// classifier on miss), persist the cache, and write the categorized rows.
#[instrument(skip_all, fields(input = %input.display()))]
pub async fn categorize_stage(
    input: &Path,
    output: &Path,
    cache_path: &Path,
    client: &ClassifierClient,
    classify: &ClassifyConfig,
) -> Result<CategorizeReport> {
    let rows = ledger::read_ingredient_rows(input)?;

    let mut cache = CategoryCache::load(cache_path)?;
    let outcome = categorize::resolve_categories(
        &rows,
        &mut cache,
        client,
        &classify.categorize_model,
        classify.categorize_concurrency as usize,
    )
    .await?;

    let categorized = categorize::categorize_rows(rows, &cache);
    let unknown_rows = categorized
        .iter()
        .filter(|r| r.category == UNKNOWN_CATEGORY)
        .count();

    ledger::write_categorized_rows(output, &categorized)?;
    info!(path = %output.display(), rows = categorized.len(), unknown_rows, "stage 2 written");

    Ok(CategorizeReport {
        rows: categorized.len(),
        resolved: outcome.resolved,
        unresolved: outcome.unresolved,
        cache_hits: outcome.cache_hits,
        unknown_rows,
        output: output.to_path_buf(),
    })
}

/// Report from the impact stage.
#[derive(Debug)]
pub struct ImpactReport {
    pub categories: usize,
    pub output_lbs: PathBuf,
    pub output_metric: PathBuf,
}

/// Stage 3: join categorized rows against the factor table and write both
/// summary views from one aggregation pass.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn impact_stage(
    input: &Path,
    factors_path: &Path,
    output_lbs: &Path,
    output_metric: &Path,
) -> Result<ImpactReport> {
    let factors = impact::FactorTable::load(factors_path)?;
    let rows = ledger::read_categorized_rows(input)?;

    let summary = impact::aggregate(&rows, &factors);

    let imperial = impact::render_imperial(&summary);
    ledger::write_formatted_table(output_lbs, &imperial.header, &imperial.rows)?;

    let metric = impact::render_metric(&summary);
    ledger::write_formatted_table(output_metric, &metric.header, &metric.rows)?;

    info!(
        lbs = %output_lbs.display(),
        metric = %output_metric.display(),
        categories = summary.categories.len(),
        "stage 3 written"
    );

    Ok(ImpactReport {
        categories: summary.categories.len(),
        output_lbs: output_lbs.to_path_buf(),
        output_metric: output_metric.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

/// Run the full pipeline.
///
/// 1. Decompose the ledger into weighted ingredient rows
/// 2. Categorize via cache + classifier
/// 3. Aggregate into impact summaries (imperial + metric)
///
/// Stages hand off through their persisted files under `output_dir`.
#[instrument(skip_all, fields(input = %config.input.display()))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    client: &ClassifierClient,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();

    let stage1_path = config.output_dir.join(STAGE1_FILE);
    let stage2_path = config.output_dir.join(STAGE2_FILE);
    let lbs_path = config.output_dir.join(IMPACTS_LBS_FILE);
    let metric_path = config.output_dir.join(IMPACTS_METRIC_FILE);

    progress.phase("Decomposing products into ingredients");
    let decompose_report =
        decompose_stage(&config.input, &stage1_path, client, &config.classify).await?;

    progress.phase("Resolving ingredient categories");
    let categorize_report = categorize_stage(
        &stage1_path,
        &stage2_path,
        &config.cache,
        client,
        &config.classify,
    )
    .await?;

    progress.phase("Computing impact summaries");
    let impact_report = impact_stage(&stage2_path, &config.factors, &lbs_path, &metric_path)?;

    let summary = RunSummary {
        products: decompose_report.products,
        allocations: decompose_report.allocations,
        skipped_products: decompose_report.skipped,
        resolved: categorize_report.resolved,
        unresolved: categorize_report.unresolved,
        unknown_rows: categorize_report.unknown_rows,
        outputs: vec![
            decompose_report.output,
            categorize_report.output,
            impact_report.output_lbs,
            impact_report.output_metric,
        ],
        elapsed: start.elapsed(),
    };

    progress.done(&summary);

    info!(
        products = summary.products,
        allocations = summary.allocations,
        skipped = summary.skipped_products,
        resolved = summary.resolved,
        unknown_rows = summary.unknown_rows,
        elapsed_ms = summary.elapsed.as_millis(),
        "pipeline complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fp-pipeline-test-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn classify_config() -> ClassifyConfig {
        ClassifyConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key_env: "UNUSED".into(),
            decompose_model: "gpt-4o".into(),
            categorize_model: "gpt-4o-mini".into(),
            max_retries: 0,
            decompose_concurrency: 4,
            categorize_concurrency: 4,
        }
    }

    const FACTORS_CSV: &str = "\
category,co2,land_acres,land_metric,carbon_opp,kcal,d_lives,t_lives,water,eutro\n\
dairy milk,1.4,0.002,4.1,2,272,0.001,0.003,280,4.8\n\
beef,45,0.08,149,70,1300,0.004,0.009,680,137\n";

    /// Offline end-to-end run: every product matches the prioritized
    /// vocabulary and every category is pre-seeded in the cache, so the
    /// classifier endpoint (an unreachable address) is never contacted.
    #[tokio::test]
    async fn full_pipeline_runs_offline_with_seeded_cache() {
        let dir = temp_dir("e2e");
        let input = dir.join("worksheet_in.csv");
        std::fs::write(
            &input,
            "product,product_weight,unit,qty\n\
             whole milk,10,lbs,1\n\
             ground beef,5,kg,1\n",
        )
        .unwrap();

        let factors = dir.join("factors.csv");
        std::fs::write(&factors, FACTORS_CSV).unwrap();

        let cache_path = dir.join("foodcategories.json");
        {
            let mut cache = CategoryCache::load(&cache_path).unwrap();
            cache.insert_if_absent("dairy milk".into(), "dairy milk".into());
            cache.insert_if_absent("beef".into(), "beef".into());
            cache.persist().unwrap();
        }

        let config = PipelineConfig {
            input,
            output_dir: dir.join("output"),
            factors,
            cache: cache_path,
            classify: classify_config(),
        };

        let client = ClassifierClient::from_parts("http://127.0.0.1:9", "unused", 0).unwrap();
        let summary = run_pipeline(&config, &client, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.products, 2);
        assert_eq!(summary.allocations, 2);
        assert_eq!(summary.skipped_products, 0);
        assert_eq!(summary.unknown_rows, 0);
        assert_eq!(summary.outputs.len(), 4);

        // Stage-1 file carries the lbs normalization: 5 kg → 11.02 lbs.
        let stage1 = ledger::read_ingredient_rows(&config.output_dir.join(STAGE1_FILE)).unwrap();
        assert_eq!(stage1[0].ingredient, "dairy milk");
        assert_eq!(stage1[0].lbs, 10.0);
        assert_eq!(stage1[1].ingredient, "beef");
        assert_eq!(stage1[1].lbs, 11.02);

        // Both summary views exist, with Total and dairy subtotal rows.
        let lbs_out =
            std::fs::read_to_string(config.output_dir.join(IMPACTS_LBS_FILE)).unwrap();
        assert!(lbs_out.starts_with("CATEGORY,"));
        assert!(lbs_out.contains("Total,"));
        assert!(lbs_out.contains("Subtotal for dairy,"));

        let metric_out =
            std::fs::read_to_string(config.output_dir.join(IMPACTS_METRIC_FILE)).unwrap();
        assert!(metric_out.contains("(weight/kg)"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn impact_stage_is_rerunnable_from_stage2_file() {
        let dir = temp_dir("rerun");
        let stage2 = dir.join(STAGE2_FILE);
        std::fs::write(
            &stage2,
            "index,product,ingredient,category,product_weight,unit,percent,weight_ingredient,qty,lbs\n\
             2,whole milk,dairy milk,dairy milk,10,lbs,100,10,1,10\n\
             3,mystery,goo,Unknown,1,lbs,100,1,1,1\n",
        )
        .unwrap();

        let factors = dir.join("factors.csv");
        std::fs::write(&factors, FACTORS_CSV).unwrap();

        let report = impact_stage(
            &stage2,
            &factors,
            &dir.join(IMPACTS_LBS_FILE),
            &dir.join(IMPACTS_METRIC_FILE),
        )
        .unwrap();

        assert_eq!(report.categories, 2);
        let lbs_out = std::fs::read_to_string(dir.join(IMPACTS_LBS_FILE)).unwrap();
        // Unknown category groups with zero impact but keeps its weight.
        assert!(lbs_out.contains("Unknown,1.0,0,0,0,0.0,0.0,0,0.000,0.00000"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_input_file_aborts() {
        let dir = temp_dir("missing-input");
        let config = PipelineConfig {
            input: dir.join("nope.csv"),
            output_dir: dir.join("output"),
            factors: dir.join("factors.csv"),
            cache: dir.join("foodcategories.json"),
            classify: classify_config(),
        };

        let client = ClassifierClient::from_parts("http://127.0.0.1:9", "unused", 0).unwrap();
        let err = run_pipeline(&config, &client, &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("I/O error"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
