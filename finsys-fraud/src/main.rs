//! finsys-fraud - fraud scoring and report pipeline CLI
//!
//! Imports transactions, re-scores them, and generates or lists fraud
//! reports against the configured stores and remote classifier.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finsys_common::config::TomlConfig;
use finsys_fraud::FraudPipeline;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "finsys-fraud", version, about = "Transaction fraud scoring and reports")]
struct Cli {
    /// Bootstrap TOML file (overrides FINSYS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import newline-delimited JSON transactions and score them
    Import {
        /// One transaction object per line
        file: PathBuf,
    },
    /// Re-score one transaction
    Score { transaction_id: i64 },
    /// Print the report for a transaction, generating it if needed
    Report { transaction_id: i64 },
    /// List stored reports, newest first
    Reports {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 10)]
        size: i64,
    },
    /// Delete orphan report documents and list reports missing their body
    Sweep {
        /// Leave orphans younger than this alone
        #[arg(long, default_value_t = 300)]
        grace_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config comes first so its log level can seed the filter
    let config_result = TomlConfig::load(cli.config.as_deref());
    let level = config_result
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    info!("Starting finsys-fraud v{}", env!("CARGO_PKG_VERSION"));

    let config = config_result.context("Failed to load configuration")?;
    info!("Database path: {}", config.database_path.display());
    info!("Document store path: {}", config.document_store_path.display());

    let pipeline = FraudPipeline::open(&config)
        .await
        .context("Failed to open fraud pipeline")?;

    let outcome = run(&pipeline, cli.command).await;

    // Queued scoring jobs finish before exit
    pipeline.shutdown().await;
    outcome
}

/// Execute one subcommand against an open pipeline
async fn run(pipeline: &FraudPipeline, command: Command) -> Result<()> {
    match command {
        Command::Import { file } => {
            let reader = BufReader::new(
                File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.display()))?,
            );
            let summary = pipeline.loader.load_jsonl(reader).await?;
            println!(
                "imported {} transactions ({} queued for scoring, {} rejected)",
                summary.imported, summary.dispatched, summary.rejected
            );
        }
        Command::Score { transaction_id } => {
            pipeline
                .transaction_service
                .rescore(transaction_id)
                .await?;
            println!("transaction {} queued for scoring", transaction_id);
        }
        Command::Report { transaction_id } => {
            let report = pipeline.report_service.generate(transaction_id).await?;
            println!("{}", report.report);
        }
        Command::Reports { page, size } => {
            let list = pipeline.report_service.list(page, size).await?;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Command::Sweep { grace_secs } => {
            let summary = pipeline
                .reports
                .sweep_orphan_documents(Duration::from_secs(grace_secs))
                .await?;
            println!(
                "deleted {} orphan documents ({} pending), {} reports missing documents",
                summary.orphans_deleted,
                summary.orphans_pending,
                summary.missing_documents.len()
            );
            for id in summary.missing_documents {
                println!("  report {} has no document", id);
            }
        }
    }
    Ok(())
}
