//! redshift-etl CLI - extract upstream tables to S3 and load a Redshift-style
//! warehouse in dependency order.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use redshift_etl::{
    evaluate_execution_order, load_relations, show_dependents, EtlConfig, EtlError,
    ExtractOptions, ExtractOrchestrator, LoadOptions, LoadOrchestrator, LogMonitor, PgWarehouse,
    S3Store, StaticSourceExtractor, TableSelector,
};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "redshift-etl")]
#[command(about = "Extract upstream tables to S3 and load a warehouse in dependency order")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "etl.yaml")]
    config: PathBuf,

    /// Directory holding relation design (.yaml) and query (.sql) files
    #[arg(short, long, default_value = "schemas")]
    schemas: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract relations from their sources into S3 and write manifests
    Extract {
        /// Relation patterns ("schema.table", "schema", globs); empty = all
        patterns: Vec<String>,

        /// Keep going past failed required relations
        #[arg(long)]
        keep_going: bool,

        /// Log the work without writing to S3
        #[arg(long)]
        dry_run: bool,

        /// Check for upstream completion markers once instead of polling
        #[arg(long)]
        no_wait: bool,
    },

    /// Load or rebuild warehouse relations from S3
    Load {
        /// Relation patterns ("schema.table", "schema", globs); empty = all
        patterns: Vec<String>,

        /// Drop and rebuild (whole-schema mode unless --stop-after-first)
        #[arg(long)]
        drop: bool,

        /// Restrict the run to a single matched relation, no propagation
        #[arg(long)]
        stop_after_first: bool,

        /// Never restore schema backups on failure
        #[arg(long)]
        no_rollback: bool,

        /// Create tables and grants but skip data movement
        #[arg(long)]
        skip_copy: bool,

        /// Log the work without touching the warehouse
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the execution order and dependents for a selection
    Show {
        /// Relation patterns ("schema.table", "schema", globs); empty = all
        patterns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), EtlError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| EtlError::Config(e.to_string()))?;

    let config = Arc::new(EtlConfig::load(&cli.config)?);
    info!("Loaded configuration from {:?}", cli.config);
    let relations = load_relations(&cli.schemas, &config)?;

    match cli.command {
        Commands::Extract {
            patterns,
            keep_going,
            dry_run,
            no_wait,
        } => {
            let selector = selector(&patterns)?;
            let (worklist, _) = evaluate_execution_order(relations, &selector, false, false)?;
            let store = Arc::new(S3Store::new());
            let orchestrator = Arc::new(ExtractOrchestrator::new(
                Arc::new(StaticSourceExtractor::new(store.clone())),
                store,
                Arc::new(LogMonitor),
                config,
                ExtractOptions {
                    keep_going,
                    dry_run,
                    wait: !no_wait,
                },
            ));
            let report = orchestrator.run(worklist).await?;
            if report.failed.is_empty() {
                println!("Extract completed");
            } else {
                println!("Extract completed with failures: {:?}", report.failed);
            }
        }

        Commands::Load {
            patterns,
            drop,
            stop_after_first,
            no_rollback,
            skip_copy,
            dry_run,
        } => {
            let selector = selector(&patterns)?;
            let (worklist, schemas) =
                evaluate_execution_order(relations, &selector, stop_after_first, drop && !stop_after_first)?;
            let orchestrator = LoadOrchestrator::new(
                Arc::new(PgWarehouse::new(config.warehouse.clone())),
                Arc::new(S3Store::new()),
                Arc::new(LogMonitor),
                config,
            );
            let options = LoadOptions {
                drop,
                stop_after_first,
                no_rollback,
                skip_copy,
                dry_run,
            };
            let report = orchestrator.run(worklist, &schemas, options).await?;
            println!(
                "Load completed: {} loaded, {} skipped",
                report.loaded.len(),
                report.skipped.len()
            );
            if !report.skipped.is_empty() {
                println!("  Skipped: {:?}", report.skipped);
            }
        }

        Commands::Show { patterns } => {
            let selector = selector(&patterns)?;
            print!("{}", show_dependents(relations, &selector)?);
        }
    }

    Ok(())
}

fn selector(patterns: &[String]) -> Result<TableSelector, EtlError> {
    if patterns.is_empty() {
        Ok(TableSelector::match_all())
    } else {
        TableSelector::new(patterns)
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
