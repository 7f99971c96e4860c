//! Harvester command line
//!
//! `leilao harvest` is the scheduled entry point; `leilao sanitize` re-checks
//! stored broker links after the URL gate lists change. Results are printed as
//! JSON for the scheduler to capture.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use auction_extraction::{Sanitizer, ScoringFilter, UrlGate};
use auction_harvester::{
    AppConfig, HarvestWindow, Harvester, MemoryStore, PncpClient, PncpDetailLookup, PostgresStore,
    SanitizeMode, SanitizeRunner, Store,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "leilao")]
#[command(about = "PNCP public auction harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest the window after the last checkpoint
    Harvest {
        /// Explicit window start (RFC 3339); requires --end
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        /// Explicit window end (RFC 3339); requires --start
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,

        /// Stop after this many listed candidates
        #[arg(long)]
        limit: Option<usize>,

        /// Keep everything in memory instead of Postgres
        #[arg(long)]
        memory: bool,
    },

    /// Re-validate stored broker links against the current URL gate
    Sanitize {
        /// Write corrections (default is a dry run)
        #[arg(long)]
        execute: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Score a text with the relevance filter
    Score { text: String },

    /// Run a single URL through the validation gate
    CheckUrl { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,auction_harvester=debug,auction_extraction=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let extraction = config
        .extraction_config()
        .context("Failed to load extraction configuration")?;

    match cli.command {
        Commands::Harvest {
            start,
            end,
            limit,
            memory,
        } => {
            let mut harvest_config = config.harvest.clone();
            if let Some(limit) = limit {
                harvest_config = harvest_config.with_record_limit(limit);
            }

            let store: Arc<dyn Store> = if memory {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(connect(&config).await?)
            };

            let client = Arc::new(PncpClient::new(&harvest_config).context("Failed to build PNCP client")?);
            let lookup = Arc::new(PncpDetailLookup::new(client.clone()));
            let harvester = Harvester::new(harvest_config, extraction, client, lookup, store)
                .context("Failed to compile extraction configuration")?;

            let entry = match (start, end) {
                (Some(start), Some(end)) => {
                    if start >= end {
                        bail!("--start must be before --end");
                    }
                    harvester.run_for_window(HarvestWindow::new(start, end)).await
                }
                _ => harvester.run(Utc::now()).await,
            };
            print_json(&entry)?;
            if let Some(error) = entry.error {
                bail!("Harvest run incomplete: {error}");
            }
        }

        Commands::Sanitize { execute, limit } => {
            let store = Arc::new(connect(&config).await?);
            let sanitizer = Sanitizer::from_config(&extraction.url_gate)
                .context("Failed to compile URL gate")?;
            let mode = if execute {
                SanitizeMode::Execute
            } else {
                SanitizeMode::DryRun
            };
            let report = SanitizeRunner::new(sanitizer, store)
                .run(mode, limit)
                .await
                .context("Sanitation failed")?;
            print_json(&report)?;
        }

        Commands::Score { text } => {
            let filter = ScoringFilter::new(&extraction.scoring).context("Failed to compile scoring terms")?;
            print_json(&filter.evaluate(&text))?;
        }

        Commands::CheckUrl { url } => {
            let gate = UrlGate::new(&extraction.url_gate).context("Failed to compile URL gate")?;
            print_json(&gate.validate_url(&url))?;
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> Result<PostgresStore> {
    PostgresStore::connect(config.database_url()?)
        .await
        .context("Failed to connect to database")
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
