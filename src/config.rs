//! Configuration for deskpipe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DESKPIPE_HOME)
//! 2. Config file (.deskpipe/config.yaml)
//! 3. Defaults (~/.deskpipe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .deskpipe/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::pipeline::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tickets: TicketsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the config file's parent)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Escalate when sentiment scores below this (range [0, 1])
    pub sentiment_escalation_threshold: Option<f32>,

    /// Escalate unanswerable messages longer than this many words
    pub max_unassisted_words: Option<usize>,

    /// Retry policy for transient step failures
    pub retry: Option<RetryPolicy>,

    /// High-risk terms that always escalate (billing disputes, legal threats)
    pub high_risk_keywords: Option<Vec<String>>,

    /// Terms meaning the customer asked for a person
    pub human_request_keywords: Option<Vec<String>>,

    /// Optional YAML file with additional knowledge entries
    pub knowledge_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketsConfig {
    /// Minutes of silence before an active conversation stops absorbing
    /// new inbound messages
    pub reengagement_window_minutes: Option<i64>,

    /// Seconds after which a crashed worker's in-progress claim may be
    /// reclaimed
    pub processing_claim_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// Days a (channel, provider message id) pair is remembered
    pub dedup_retention_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkersConfig {
    /// Tickets processed concurrently
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    /// Hard response length limit for SMS-like channels
    pub sms_max_chars: Option<usize>,

    /// Marker appended when a response is truncated
    pub continuation_marker: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryConfig {
    /// Outbound webhook endpoint (enables the webhook adapter)
    pub webhook_url: Option<String>,
}

/// Resolved configuration with absolute paths and defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to deskpipe home (state directory)
    pub home: PathBuf,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    pub pipeline: PipelineSettings,
    pub tickets: TicketSettings,
    pub ingest: IngestSettings,
    pub workers: WorkerSettings,
    pub channels: ChannelSettings,
    pub delivery: DeliverySettings,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub sentiment_escalation_threshold: f32,
    pub max_unassisted_words: usize,
    pub retry: RetryPolicy,
    pub high_risk_keywords: Vec<String>,
    pub human_request_keywords: Vec<String>,
    pub knowledge_file: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sentiment_escalation_threshold: 0.3,
            max_unassisted_words: 120,
            retry: RetryPolicy::default(),
            high_risk_keywords: default_high_risk_keywords(),
            human_request_keywords: default_human_request_keywords(),
            knowledge_file: None,
        }
    }
}

/// Terms that always route a ticket to a human
fn default_high_risk_keywords() -> Vec<String> {
    [
        "lawyer", "legal", "sue", "attorney", "lawsuit", "refund", "chargeback",
        "cancellation", "gdpr", "data breach", "compliance",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_human_request_keywords() -> Vec<String> {
    ["human", "agent", "real person", "manager", "representative"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct TicketSettings {
    pub reengagement_window: chrono::Duration,
    pub processing_claim_timeout: Duration,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            reengagement_window: chrono::Duration::minutes(1440),
            processing_claim_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub dedup_retention: chrono::Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            dedup_retention: chrono::Duration::days(7),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub sms_max_chars: usize,
    pub continuation_marker: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            sms_max_chars: 300,
            continuation_marker: " [...]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliverySettings {
    pub webhook_url: Option<String>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".deskpipe").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Build a resolved config from a parsed file (or defaults when absent)
fn resolve(file: ConfigFile, config_path: Option<PathBuf>) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".deskpipe");

    let base_dir = config_path
        .as_deref()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let home = if let Ok(env_home) = std::env::var("DESKPIPE_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file.paths.home {
        resolve_path(&base_dir, home_path)
    } else {
        default_home
    };

    let pipeline_defaults = PipelineSettings::default();
    let pipeline = PipelineSettings {
        sentiment_escalation_threshold: file
            .pipeline
            .sentiment_escalation_threshold
            .unwrap_or(pipeline_defaults.sentiment_escalation_threshold),
        max_unassisted_words: file
            .pipeline
            .max_unassisted_words
            .unwrap_or(pipeline_defaults.max_unassisted_words),
        retry: file.pipeline.retry.unwrap_or_default(),
        high_risk_keywords: file
            .pipeline
            .high_risk_keywords
            .unwrap_or(pipeline_defaults.high_risk_keywords),
        human_request_keywords: file
            .pipeline
            .human_request_keywords
            .unwrap_or(pipeline_defaults.human_request_keywords),
        knowledge_file: file
            .pipeline
            .knowledge_file
            .map(|p| resolve_path(&base_dir, &p)),
    };

    let ticket_defaults = TicketSettings::default();
    let tickets = TicketSettings {
        reengagement_window: file
            .tickets
            .reengagement_window_minutes
            .map(chrono::Duration::minutes)
            .unwrap_or(ticket_defaults.reengagement_window),
        processing_claim_timeout: file
            .tickets
            .processing_claim_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(ticket_defaults.processing_claim_timeout),
    };

    let ingest = IngestSettings {
        dedup_retention: file
            .ingest
            .dedup_retention_days
            .map(chrono::Duration::days)
            .unwrap_or(IngestSettings::default().dedup_retention),
    };

    let workers = WorkerSettings {
        concurrency: file
            .workers
            .concurrency
            .unwrap_or(WorkerSettings::default().concurrency),
    };

    let channel_defaults = ChannelSettings::default();
    let channels = ChannelSettings {
        sms_max_chars: file
            .channels
            .sms_max_chars
            .unwrap_or(channel_defaults.sms_max_chars),
        continuation_marker: file
            .channels
            .continuation_marker
            .unwrap_or(channel_defaults.continuation_marker),
    };

    let delivery = DeliverySettings {
        webhook_url: file.delivery.webhook_url,
    };

    Ok(ResolvedConfig {
        home,
        config_file: config_path,
        pipeline,
        tickets,
        ingest,
        workers,
        channels,
        delivery,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            resolve(file, Some(path))
        }
        None => resolve(ConfigFile::default(), None),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the deskpipe home directory (state)
pub fn deskpipe_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Path of the dedup journal ($DESKPIPE_HOME/dedup.jsonl)
pub fn dedup_journal_path() -> Result<PathBuf> {
    Ok(config()?.home.join("dedup.jsonl"))
}
