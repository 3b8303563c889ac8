//! Catalog Ingest - product catalog loader

use anyhow::{bail, Context, Result};
use catalog_common::logging::{init_logging, LogConfig, LogLevel};
use catalog_ingest::config::IngestConfig;
use catalog_ingest::pipeline::Pipeline;
use catalog_ingest::report::{LogReporter, ProgressReporter, Reporter};
use catalog_ingest::source::SourceReader;
use catalog_ingest::SchemaCleaner;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Records shown by `inspect`
const INSPECT_PREVIEW: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "catalog-ingest")]
#[command(author, version, about = "Load a product catalog CSV into a document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Store connection string (mongodb://, postgres://, memory://)
    #[arg(long, global = true, env = "CATALOG_MONGO_URI")]
    uri: Option<String>,

    /// Database name (schema name for Postgres)
    #[arg(long, global = true, env = "CATALOG_DATABASE")]
    database: Option<String>,

    /// Collection name
    #[arg(long, global = true, env = "CATALOG_COLLECTION")]
    collection: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Truncate the collection and load the input file into it
    Load {
        /// Input CSV file
        #[arg(short, long, env = "CATALOG_INPUT")]
        input: Option<PathBuf>,

        /// Documents per bulk insert
        #[arg(long)]
        batch_size: Option<usize>,

        /// Batches in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Load into an in-memory store instead of the configured one
        #[arg(long)]
        dry_run: bool,

        /// Skip post-load verification
        #[arg(long)]
        skip_verify: bool,

        /// Write the run outcome as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run verification queries against the existing collection
    Verify {
        /// Write the verification report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Read and clean the input without touching any store
    Inspect {
        /// Input CSV file
        #[arg(short, long, env = "CATALOG_INPUT")]
        input: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct InspectSummary<'a> {
    source: &'a catalog_ingest::source::SourceSummary,
    clean: &'a catalog_ingest::CleanSummary,
    preview: &'a [catalog_ingest::ValidatedRecord],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Also reads `.env`, so it has to run before the LOG_* lookup below
    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("catalog-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    if let Some(uri) = cli.uri {
        config.store.uri = uri;
    }
    if let Some(database) = cli.database {
        config.store.database = database;
    }
    if let Some(collection) = cli.collection {
        config.store.collection = collection;
    }

    match cli.command {
        Command::Load {
            input,
            batch_size,
            concurrency,
            dry_run,
            skip_verify,
            report,
        } => {
            if let Some(input) = input {
                config.source.input = input;
            }
            if let Some(batch_size) = batch_size {
                config.load.batch_size = batch_size;
            }
            if let Some(concurrency) = concurrency {
                config.load.concurrency = concurrency;
            }
            if dry_run {
                config.store.uri = "memory://".to_string();
            }
            config.verify.enabled = !skip_verify;
            config.validate()?;

            load(config, dry_run, report.as_deref()).await
        },
        Command::Verify { report } => {
            config.validate()?;
            verify(config, report.as_deref()).await
        },
        Command::Inspect { input } => {
            if let Some(input) = input {
                config.source.input = input;
            }
            config.validate()?;
            inspect(&config)
        },
    }
}

async fn load(config: IngestConfig, dry_run: bool, report_path: Option<&Path>) -> Result<()> {
    if dry_run {
        info!("Dry run: loading into an in-memory store");
    } else {
        warn!(
            uri = %config.redacted_uri(),
            database = %config.store.database,
            collection = %config.store.collection,
            "Every existing document in the collection will be deleted before loading"
        );
    }

    let reporter: Arc<dyn Reporter> = if std::io::stderr().is_terminal() {
        Arc::new(ProgressReporter::new())
    } else {
        Arc::new(LogReporter)
    };

    let mut pipeline = Pipeline::new(config, reporter);
    let outcome = pipeline.run().await?;

    if let Some(path) = report_path {
        write_report(path, &outcome)?;
    }

    info!(
        run_id = %outcome.run_id,
        state = %outcome.state,
        rows_read = outcome.load.rows_read,
        rows_dropped = outcome.load.rows_dropped,
        inserted = outcome.load.total_inserted,
        errored = outcome.load.total_errored,
        "Load complete"
    );

    if !outcome.succeeded() {
        bail!("No documents were inserted");
    }
    Ok(())
}

async fn verify(config: IngestConfig, report_path: Option<&Path>) -> Result<()> {
    let mut pipeline = Pipeline::new(config, Arc::new(LogReporter));
    let report = pipeline.verify_only().await?;

    match report_path {
        Some(path) => write_report(path, &report)?,
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !report.complete {
        warn!(failed_checks = report.failures.len(), "Verification incomplete");
    }
    Ok(())
}

fn inspect(config: &IngestConfig) -> Result<()> {
    let data = SourceReader::new(config.source.delimiter)
        .read_path(&config.source.input)
        .with_context(|| format!("Failed to read {}", config.source.input.display()))?;
    let cleaned = SchemaCleaner::new(config.null_tokens()).clean(data.rows);

    let preview_len = cleaned.validated.len().min(INSPECT_PREVIEW);
    let summary = InspectSummary {
        source: &data.summary,
        clean: &cleaned.summary,
        preview: &cleaned.validated[..preview_len],
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn write_report<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}
