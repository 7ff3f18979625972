//! Command-line interface for deskpipe.
//!
//! Provides commands for running a batch of canonical messages through the
//! pipeline and for inspecting the resolved configuration.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::adapters::{LoopbackAdapter, WebhookAdapter};
use crate::config;
use crate::core::{JournalDedupBackend, SupportService};
use crate::domain::{CanonicalMessage, Channel};

/// deskpipe - multi-channel support ticket pipeline
#[derive(Parser, Debug)]
#[command(name = "deskpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest canonical messages (JSONL) and process all resulting tickets
    Run {
        /// Input file with one canonical message JSON object per line
        /// (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { input } => run_batch(input).await,
            Commands::Config => show_config(),
        }
    }
}

/// Read canonical messages, ingest, process, and deliver
async fn run_batch(input: Option<PathBuf>) -> Result<()> {
    let content = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    let config = config::config()?;

    // Journal-backed dedup so repeated CLI runs stay idempotent
    let journal = JournalDedupBackend::open(&config::dedup_journal_path()?)
        .await
        .context("Failed to open dedup journal")?;
    let mut service = SupportService::with_dedup_backend(config, Box::new(journal))?;

    // Webhook gateway if configured, loopback otherwise
    let channels = [Channel::Email, Channel::WebForm, Channel::Sms];
    let loopback = Arc::new(LoopbackAdapter::new());
    match &config.delivery.webhook_url {
        Some(url) => {
            let webhook = Arc::new(WebhookAdapter::new(url.clone()));
            for channel in channels {
                service.register_adapter(channel, webhook.clone());
            }
        }
        None => {
            for channel in channels {
                service.register_adapter(channel, loopback.clone());
            }
        }
    }

    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    let mut rejected = 0usize;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let message: CanonicalMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping unparseable line");
                rejected += 1;
                continue;
            }
        };

        match service.ingest(message).await {
            Ok(crate::core::IngestOutcome::Accepted { .. }) => accepted += 1,
            Ok(crate::core::IngestOutcome::Duplicate) => duplicates += 1,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Message rejected");
                rejected += 1;
            }
        }
    }

    println!(
        "Ingested: {} accepted, {} duplicates, {} rejected",
        accepted, duplicates, rejected
    );

    let report = service.run_workers_until_idle().await;
    println!(
        "Processed: {} tickets ({} resolved, {} escalated, {} skipped, {} failed)",
        report.processed, report.resolved, report.escalated, report.skipped, report.failed
    );

    let delivery = service.deliver_outbound().await;
    println!(
        "Delivered: {} of {} outbound messages ({} failed)",
        delivery.sent, delivery.attempted, delivery.failed
    );

    let counts = service.counts();
    println!(
        "Tickets: {} open, {} in progress, {} resolved, {} escalated",
        counts.open, counts.in_progress, counts.resolved, counts.escalated
    );

    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let config = config::config()?;

    println!("Home:                {}", config.home.display());
    match &config.config_file {
        Some(path) => println!("Config file:         {}", path.display()),
        None => println!("Config file:         (none, using defaults)"),
    }
    println!(
        "Sentiment threshold: {}",
        config.pipeline.sentiment_escalation_threshold
    );
    println!(
        "Unassisted words:    {}",
        config.pipeline.max_unassisted_words
    );
    println!(
        "Re-engagement:       {} minutes",
        config.tickets.reengagement_window.num_minutes()
    );
    println!(
        "Claim timeout:       {} seconds",
        config.tickets.processing_claim_timeout.as_secs()
    );
    println!(
        "Dedup retention:     {} days",
        config.ingest.dedup_retention.num_days()
    );
    println!("Worker concurrency:  {}", config.workers.concurrency);
    println!("SMS max chars:       {}", config.channels.sms_max_chars);
    match &config.delivery.webhook_url {
        Some(url) => println!("Delivery webhook:    {}", url),
        None => println!("Delivery webhook:    (loopback)"),
    }

    Ok(())
}
