//! Atelier CLI Binary
//!
//! Runs generation batches, scores trigger signals and validates configuration.

use anyhow::{bail, Context, Result};
use atelier::config::{AtelierConfig, ConfigLoader};
use atelier::executor::PipelineStatus;
use atelier::logging::{init_logging, LogFormat, LoggingConfig};
use atelier::plan::SessionAssetPlan;
use atelier::trigger::{TriggerClassifier, TriggerSignals};
use atelier::{GenerationPipeline, JobDescriptor, JobStatus};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};

/// Atelier - progressive multi-provider media generation
#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Generate session media through a fallback chain of providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (overrides layered config loading)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate every job in a batch file and report the result
    Run {
        /// JSON file: a list of job descriptors or a session asset plan
        #[arg(long)]
        batch: PathBuf,
        /// Asset storage root
        #[arg(long)]
        storage: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Score a set of trigger signals
    Score {
        /// JSON file with trigger signals
        #[arg(long)]
        signals: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the layered configuration
    Validate,
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&logging_config(&cli, &config))) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match execute(&cli, config).await {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<AtelierConfig> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => ConfigLoader::load(&cli.workspace).context("loading layered configuration"),
    }
}

/// CLI flags override the config file.
fn logging_config(cli: &Cli, config: &AtelierConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = cli.log_format.as_deref().and_then(|f| f.parse::<LogFormat>().ok()) {
        logging.format = format;
    }
    logging
}

async fn execute(cli: &Cli, mut config: AtelierConfig) -> Result<String> {
    match &cli.command {
        Commands::Run {
            batch,
            storage,
            format,
        } => {
            if let Some(root) = storage {
                config.storage.root = root.clone();
            }
            validate(&config)?;
            let descriptors = read_batch(batch)?;
            let pipeline = GenerationPipeline::from_config(config)?;
            pipeline.enqueue_batch(descriptors)?;
            let summary = pipeline.run().await;
            info!(
                dispatched = summary.dispatched,
                cache_hits = summary.cache_hits,
                "Batch finished"
            );
            let status = pipeline.status();
            match format {
                OutputFormat::Json => Ok(serde_json::to_string_pretty(&status)?),
                OutputFormat::Text => Ok(render_status(&status)),
            }
        }
        Commands::Score { signals, format } => {
            let raw = std::fs::read_to_string(signals)
                .with_context(|| format!("reading {}", signals.display()))?;
            let signals: TriggerSignals =
                serde_json::from_str(&raw).context("parsing trigger signals")?;
            let score = TriggerClassifier::new(config.trigger.clone()).score(&signals);
            match format {
                OutputFormat::Json => Ok(serde_json::to_string_pretty(&score)?),
                OutputFormat::Text => Ok(format!(
                    "score {} / threshold {}: {}",
                    score.score,
                    config.trigger.threshold,
                    if score.trigger {
                        "trigger".green().bold().to_string()
                    } else {
                        "no trigger".dimmed().to_string()
                    }
                )),
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Validate => {
                validate(&config)?;
                Ok(format!(
                    "{} {} providers, storage at {}",
                    "configuration valid:".green(),
                    config.providers.len(),
                    config.storage.root.display()
                ))
            }
            ConfigCommands::Show => Ok(toml::to_string_pretty(&config)?),
        },
    }
}

fn validate(config: &AtelierConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
        bail!("configuration validation failed:\n{}", lines.join("\n"));
    }
    Ok(())
}

/// A batch is either a bare descriptor list or a session asset plan.
fn read_batch(path: &Path) -> Result<Vec<JobDescriptor>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if let Ok(descriptors) = serde_json::from_str::<Vec<JobDescriptor>>(&raw) {
        return Ok(descriptors);
    }
    let plan: SessionAssetPlan = serde_json::from_str(&raw)
        .with_context(|| format!("{} is neither a descriptor list nor a plan", path.display()))?;
    Ok(plan.into_descriptors())
}

fn render_status(status: &PipelineStatus) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Job", "Category", "Subject", "Status", "Locator"]);
    for job in &status.jobs {
        let state = match job.status {
            JobStatus::Complete => job.status.to_string().green().to_string(),
            JobStatus::Failed => job.status.to_string().red().to_string(),
            _ => job.status.to_string().yellow().to_string(),
        };
        let locator = job
            .locator
            .as_ref()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            job.id.to_string(),
            job.category.to_string(),
            job.subject_id.clone(),
            state,
            locator,
        ]);
    }
    format!(
        "{}\n{} complete, {} failed, {} pending ({}%)",
        table, status.complete, status.failed, status.pending, status.percent_complete
    )
}
