//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use foodprint_classifier::ClassifierClient;
use foodprint_core::pipeline::{
    self, IMPACTS_LBS_FILE, IMPACTS_METRIC_FILE, PipelineConfig, ProgressReporter, RunSummary,
    STAGE1_FILE, STAGE2_FILE,
};
use foodprint_shared::{AppConfig, ClassifyConfig, load_config, validate_api_key};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// foodprint — turn purchase ledgers into environmental-impact summaries.
#[derive(Parser)]
#[command(
    name = "foodprint",
    version,
    about = "Convert a purchase worksheet into per-category environmental-impact summaries.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline: decompose, categorize, compute impacts.
    Run {
        /// Input worksheet (CSV with product, product_weight, unit columns).
        input: PathBuf,

        /// Output directory for stage files and summaries.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Conversion-factor table (defaults to the configured path).
        #[arg(long)]
        factors: Option<PathBuf>,

        /// Category cache file (defaults to the configured path).
        #[arg(long)]
        cache: Option<PathBuf>,
    },

    /// Stage 1 only: decompose products into weighted ingredient rows.
    Decompose {
        /// Input worksheet.
        input: PathBuf,

        /// Output directory.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Stage 2 only: categorize a stage-1 file via the cache + classifier.
    Categorize {
        /// Stage-1 file (defaults to <out>/impacts1done_lbs.csv).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Category cache file (defaults to the configured path).
        #[arg(long)]
        cache: Option<PathBuf>,
    },

    /// Stage 3 only: compute impact summaries from a stage-2 file.
    Impact {
        /// Stage-2 file (defaults to <out>/impacts2done_lbs.csv).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Conversion-factor table (defaults to the configured path).
        #[arg(long)]
        factors: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "foodprint=info",
        1 => "foodprint=debug",
        _ => "foodprint=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            input,
            out,
            factors,
            cache,
        } => cmd_run(input, out, factors, cache).await,
        Command::Decompose { input, out } => cmd_decompose(input, out).await,
        Command::Categorize { input, out, cache } => cmd_categorize(input, out, cache).await,
        Command::Impact {
            input,
            out,
            factors,
        } => cmd_impact(input, out, factors).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Resolve the output directory: flag > config default.
fn output_dir(out: Option<PathBuf>, config: &AppConfig) -> PathBuf {
    out.unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir))
}

/// Build a classifier client after checking the API key is available.
fn build_client(config: &AppConfig) -> Result<(ClassifierClient, ClassifyConfig)> {
    validate_api_key(config)?;
    let classify = ClassifyConfig::from(config);
    let client = ClassifierClient::new(&classify)?;
    Ok((client, classify))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    input: PathBuf,
    out: Option<PathBuf>,
    factors: Option<PathBuf>,
    cache: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let (client, classify) = build_client(&config)?;

    let pipeline_config = PipelineConfig {
        input,
        output_dir: output_dir(out, &config),
        factors: factors.unwrap_or_else(|| PathBuf::from(&config.files.factors)),
        cache: cache.unwrap_or_else(|| PathBuf::from(&config.files.category_cache)),
        classify,
    };

    info!(input = %pipeline_config.input.display(), "running pipeline");

    let reporter = CliProgress::new();
    let summary = pipeline::run_pipeline(&pipeline_config, &client, &reporter).await?;

    println!();
    println!("  Pipeline complete!");
    println!("  Products:     {}", summary.products);
    println!("  Allocations:  {}", summary.allocations);
    println!("  Skipped:      {}", summary.skipped_products);
    println!("  New cached:   {}", summary.resolved);
    println!("  Unknown rows: {}", summary.unknown_rows);
    for output in &summary.outputs {
        println!("  Wrote:        {}", output.display());
    }
    println!("  Time:         {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_decompose(input: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let (client, classify) = build_client(&config)?;
    let output = output_dir(out, &config).join(STAGE1_FILE);

    let report = pipeline::decompose_stage(&input, &output, &client, &classify).await?;

    println!();
    println!("  Decomposition complete!");
    println!("  Products:    {}", report.products);
    println!("  Allocations: {}", report.allocations);
    println!("  Skipped:     {}", report.skipped);
    println!("  Wrote:       {}", report.output.display());
    println!();

    Ok(())
}

async fn cmd_categorize(
    input: Option<PathBuf>,
    out: Option<PathBuf>,
    cache: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let (client, classify) = build_client(&config)?;

    let out_dir = output_dir(out, &config);
    let input = input.unwrap_or_else(|| out_dir.join(STAGE1_FILE));
    let output = out_dir.join(STAGE2_FILE);
    let cache = cache.unwrap_or_else(|| PathBuf::from(&config.files.category_cache));

    let report =
        pipeline::categorize_stage(&input, &output, &cache, &client, &classify).await?;

    println!();
    println!("  Categorization complete!");
    println!("  Rows:         {}", report.rows);
    println!("  Cache hits:   {}", report.cache_hits);
    println!("  New cached:   {}", report.resolved);
    println!("  Unresolved:   {}", report.unresolved);
    println!("  Unknown rows: {}", report.unknown_rows);
    println!("  Wrote:        {}", report.output.display());
    println!();

    Ok(())
}

async fn cmd_impact(
    input: Option<PathBuf>,
    out: Option<PathBuf>,
    factors: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;

    let out_dir = output_dir(out, &config);
    let input = input.unwrap_or_else(|| out_dir.join(STAGE2_FILE));
    let factors = factors.unwrap_or_else(|| PathBuf::from(&config.files.factors));

    let report = pipeline::impact_stage(
        &input,
        &factors,
        &out_dir.join(IMPACTS_LBS_FILE),
        &out_dir.join(IMPACTS_METRIC_FILE),
    )?;

    println!();
    println!("  Impact summaries written!");
    println!("  Categories: {}", report.categories);
    println!("  Imperial:   {}", report.output_lbs.display());
    println!("  Metric:     {}", report.output_metric.display());
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = foodprint_shared::init_config()?;
    println!("Created default config at {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
