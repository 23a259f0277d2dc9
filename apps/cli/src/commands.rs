//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contactscout_core::{
    BatchCancel, BatchProgress, BatchReport, JsonLinesSink, Pipeline, QueryTierPlanner,
    RecordOutcome, load_records,
};
use contactscout_shared::{
    AppConfig, MatchStatus, PipelineConfig, init_config, load_config, load_config_from,
    validate_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// contactscout: find and verify contact details for a list of people.
#[derive(Parser)]
#[command(
    name = "contactscout",
    version,
    about = "Find and verify contact details for a batch of professionals.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.contactscout/contactscout.toml).
    #[arg(long, global = true, env = "CONTACTSCOUT_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Retrieve contacts for every record in a batch.
    Run {
        /// JSON array of input records.
        #[arg(short, long)]
        input: PathBuf,

        /// JSON-lines file receiving one result per record.
        #[arg(short, long, default_value = "results.jsonl")]
        output: PathBuf,

        /// Records processed at once (capped at the pool capacity).
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Minimum verification confidence (0-100) to accept a contact.
        #[arg(short, long)]
        threshold: Option<u8>,

        /// Write the batch report as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the tiered search queries for each record without searching.
    Plan {
        /// JSON array of input records.
        #[arg(short, long)]
        input: PathBuf,
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
        0 => "contactscout=info",
        1 => "contactscout=debug",
        _ => "contactscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            input,
            output,
            parallelism,
            threshold,
            report,
        } => {
            let overrides = Overrides {
                parallelism,
                threshold,
            };
            cmd_run(config_path, &input, &output, overrides, report.as_deref()).await
        }
        Command::Plan { input } => cmd_plan(config_path, &input).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// CLI flags that take precedence over the config file.
#[derive(Debug, Default)]
struct Overrides {
    parallelism: Option<usize>,
    threshold: Option<u8>,
}

impl Overrides {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(p) = self.parallelism {
            config.scheduler.parallelism = p;
        }
        if let Some(t) = self.threshold {
            config.decision.confidence_threshold = t;
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    input: &Path,
    output: &Path,
    overrides: Overrides,
    report_path: Option<&Path>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    overrides.apply(&mut config);

    // Validate API key before doing anything
    let api_key = validate_api_key(&config)?;
    let pipeline_config = PipelineConfig::try_from(&config)?;

    let records = load_records(input).await?;
    if records.is_empty() {
        return Err(eyre!("no records in '{}'", input.display()));
    }

    info!(
        input = %input.display(),
        output = %output.display(),
        records = records.len(),
        threshold = pipeline_config.confidence_threshold,
        "starting batch"
    );

    let pipeline = Pipeline::build(&pipeline_config, api_key)?;
    let sink = JsonLinesSink::create(output).await?;
    let cancel = BatchCancel::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            on_interrupt.cancel_all();
        }
    });

    let progress = CliProgress::new();
    let report = pipeline.run(records, &sink, &progress, &cancel).await;
    progress.finish();

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| eyre!("cannot write report '{}': {e}", path.display()))?;
    }

    print_summary(&report, &config, output);
    Ok(())
}

fn print_summary(report: &BatchReport, config: &AppConfig, output: &Path) {
    let stats = &report.stats;
    let impact = report.impact(&config.impact);

    println!();
    println!("  Batch complete");
    println!("  Records:    {}", stats.total);
    println!("  Found:      {}", stats.found);
    println!("  Partial:    {}", stats.partial);
    println!("  Not found:  {}", stats.not_found);
    if stats.invalid > 0 {
        println!("  Invalid:    {}", stats.invalid);
    }
    if stats.failed > 0 {
        println!("  Failed:     {}", stats.failed);
    }
    if stats.cancelled > 0 {
        println!("  Cancelled:  {}", stats.cancelled);
    }
    println!("  Success:    {:.1}%", stats.success_rate());
    println!("  Saved:      {:.1} h / ${:.0}", impact.hours_saved, impact.dollars_saved);
    println!("  Results:    {}", output.display());
    println!("  Time:       {:.1}s", report.duration.as_secs_f64());
    for failure in report.failures.iter().take(10) {
        println!("    ! {}: {}", failure.record_id, failure.reason);
    }
    println!();
}

async fn cmd_plan(config_path: Option<&Path>, input: &Path) -> Result<()> {
    let config = resolve_config(config_path)?;
    let planner = QueryTierPlanner::new(config.tiers.clone())?;
    let records = load_records(input).await?;

    for record in &records {
        println!("{} ({})", record.id, record.name.trim());
        if let Err(e) = record.validate() {
            println!("  skipped: {e}");
            continue;
        }
        for query in planner.plan_all(record) {
            println!("  tier {}: {}", query.rank, query.query);
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
    found: Mutex<usize>,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg} ({elapsed})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self {
            bar,
            found: Mutex::new(0),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn batch_started(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn record_started(&self, record_id: &str) {
        self.bar.set_message(format!("searching {record_id}"));
    }

    fn record_finished(&self, outcome: &RecordOutcome) {
        if let RecordOutcome::Completed(result) = outcome {
            if result.status() == MatchStatus::Found {
                if let Ok(mut found) = self.found.lock() {
                    *found += 1;
                    self.bar.set_message(format!("{found} found"));
                }
            }
        }
        self.bar.inc(1);
    }
}
