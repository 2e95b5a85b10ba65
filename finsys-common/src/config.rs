//! Bootstrap configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `FINSYS_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/finsys/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable TOML file is not fatal: a warning is logged and
//! compiled defaults apply. A file that exists but does not parse is an error,
//! since silently ignoring a typo'd deadline would be worse than refusing to start.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "FINSYS_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Path to the relational SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Path to the SQLite file backing the document store
    #[serde(default = "default_document_store_path")]
    pub document_store_path: PathBuf,

    /// Relational store connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Remote classifier connection settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Document store settings
    #[serde(default)]
    pub document_store: DocumentStoreConfig,

    /// Scoring dispatcher settings
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Batch ingestion settings
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Report generation settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relational store connection settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// How long a connection waits on a locked database before failing
    ///
    /// Must exceed `document_store.timeout_ms`, the longest a report write
    /// holds the writer.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Remote classifier settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// `host:port` of the scoring service
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    /// Per-call deadline covering connect, send and receive
    #[serde(default = "default_classifier_deadline_ms")]
    pub deadline_ms: u64,
}

/// Document store settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DocumentStoreConfig {
    /// Bound on every document-store leg of a dual-store operation
    #[serde(default = "default_document_timeout_ms")]
    pub timeout_ms: u64,

    /// Collection holding report bodies
    #[serde(default = "default_collection")]
    pub collection: String,
}

/// Scoring dispatcher settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScoringConfig {
    /// Number of worker tasks consuming the scoring queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded queue capacity; producers wait when it is full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retry behavior for failed remote calls
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry settings for the remote classifier
///
/// `max_retries = 0` means a failed call degrades straight to the heuristic.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Batch ingestion settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IngestionConfig {
    /// Rows per relational transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Report generation settings
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ReportConfig {
    /// Absolute tolerance for balance-delta checks; `None` compares exactly
    #[serde(default)]
    pub balance_tolerance: Option<f64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./finsys.db")
}

fn default_document_store_path() -> PathBuf {
    PathBuf::from("./finsys-docs.db")
}

fn default_busy_timeout_ms() -> u64 {
    crate::db::init::DEFAULT_BUSY_TIMEOUT_MS
}

fn default_classifier_endpoint() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_classifier_deadline_ms() -> u64 {
    5_000
}

fn default_document_timeout_ms() -> u64 {
    10_000
}

fn default_collection() -> String {
    "fraud_reports".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_batch_size() -> usize {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            document_store_path: default_document_store_path(),
            database: DatabaseConfig::default(),
            classifier: ClassifierConfig::default(),
            document_store: DocumentStoreConfig::default(),
            scoring: ScoringConfig::default(),
            ingestion: IngestionConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            deadline_ms: default_classifier_deadline_ms(),
        }
    }
}

impl ClassifierConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_document_timeout_ms(),
            collection: default_collection(),
        }
    }
}

impl DocumentStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Resolve and load configuration, falling back to defaults when no file is usable
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        let Some(path) = resolve_config_path(cli_arg) else {
            info!("No configuration file found, using compiled defaults");
            return Ok(Self::default());
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Could not read config file {}: {}. Using compiled defaults.",
                    path.display(),
                    e
                );
                return Ok(Self::default());
            }
        };

        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline hang or spin
    pub fn validate(&self) -> Result<()> {
        if self.classifier.endpoint.trim().is_empty() {
            return Err(Error::Config("classifier.endpoint must not be empty".to_string()));
        }
        if self.classifier.deadline_ms == 0 {
            return Err(Error::Config("classifier.deadline_ms must be > 0".to_string()));
        }
        if self.document_store.timeout_ms == 0 {
            return Err(Error::Config("document_store.timeout_ms must be > 0".to_string()));
        }
        if self.database.busy_timeout_ms <= self.document_store.timeout_ms {
            return Err(Error::Config(
                "database.busy_timeout_ms must exceed document_store.timeout_ms".to_string(),
            ));
        }
        if self.document_store.collection.trim().is_empty() {
            return Err(Error::Config("document_store.collection must not be empty".to_string()));
        }
        if self.scoring.workers == 0 {
            return Err(Error::Config("scoring.workers must be > 0".to_string()));
        }
        if self.scoring.queue_capacity == 0 {
            return Err(Error::Config("scoring.queue_capacity must be > 0".to_string()));
        }
        if self.scoring.retry.initial_backoff_ms > self.scoring.retry.max_backoff_ms {
            return Err(Error::Config(
                "scoring.retry.initial_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }
        if self.ingestion.batch_size == 0 {
            return Err(Error::Config("ingestion.batch_size must be > 0".to_string()));
        }
        if let Some(tolerance) = self.report.balance_tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(Error::Config(
                    "report.balance_tolerance must be a non-negative number".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Resolve the configuration file path by priority
///
/// Returns `None` when neither an explicit path nor the platform default exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|path| path.exists())
}

/// Platform default configuration file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("finsys").join("config.toml"))
}
