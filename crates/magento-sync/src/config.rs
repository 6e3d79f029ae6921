//! # Connector Configuration
//!
//! Configuration management for the connector: backends, payment mode
//! policies, the database location and the job worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MAGENTO_DB_PATH=/var/lib/connector/connector.db                    │
//! │     MAGENTO_WORKER_POLL_INTERVAL=2                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/magento-connector/connector.toml (Linux)                 │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no backends, database in the platform data dir                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/connector/connector.db"
//!
//! [worker]
//! poll_interval_secs = 5
//! max_attempts = 5
//!
//! [[backends]]
//! id = "mage"
//! name = "Main shop"
//! location = "https://shop.example.com"
//! version = "1.7"
//! create_invoice_on = "paid"
//! credentials = { username = "api", password = "secret" }
//!
//! [[backends.stores]]
//! id = "1"
//! create_invoice_on = "open"
//! send_picking_done_mail = true
//!
//! [[payment_modes]]
//! name = "checkmo"
//! create_invoice_on = "open"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use magento_core::{BackendConfig, BackendId, PaymentModePolicy, DEFAULT_MAX_ATTEMPTS};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the connector database lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `connector.db` in the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Worker Settings
// =============================================================================

/// Job worker behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Interval between queue polls (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Jobs run per poll, at most.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts a job gets before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Ceiling of the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> usize {
    100
}
fn default_max_attempts() -> i64 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete connector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    /// Remote platforms to synchronize with.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Per payment method overrides.
    #[serde(default)]
    pub payment_modes: Vec<PaymentModePolicy>,
}

impl ConnectorConfig {
    /// Creates a config with defaults and no backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        let config: ConnectorConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (connector.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading connector config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load connector config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Connector config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.as_str().is_empty() {
                return Err(SyncError::InvalidConfig("backend id must not be empty".into()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate backend id '{}'",
                    backend.id
                )));
            }

            let url = url::Url::parse(&backend.location)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "Backend location must start with http:// or https://, got: {}",
                    backend.location
                )));
            }
        }

        let mut modes = HashSet::new();
        for mode in &self.payment_modes {
            if !modes.insert(mode.name.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate payment mode '{}'",
                    mode.name
                )));
            }
        }

        if self.worker.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "worker.batch_size must be greater than 0".into(),
            ));
        }
        if self.worker.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "worker.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.worker.max_attempts < 1 {
            return Err(SyncError::InvalidConfig(
                "worker.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MAGENTO_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(secs) = std::env::var("MAGENTO_WORKER_POLL_INTERVAL") {
            match secs.parse::<u64>() {
                Ok(s) => self.worker.poll_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid MAGENTO_WORKER_POLL_INTERVAL"),
            }
        }

        if let Ok(attempts) = std::env::var("MAGENTO_WORKER_MAX_ATTEMPTS") {
            match attempts.parse::<i64>() {
                Ok(n) => self.worker.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid MAGENTO_WORKER_MAX_ATTEMPTS"),
            }
        }

        if let Ok(size) = std::env::var("MAGENTO_WORKER_BATCH_SIZE") {
            if let Ok(n) = size.parse::<usize>() {
                self.worker.batch_size = n;
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "magento", "magento-connector")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("connector.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database file to open.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("connector.db")))
            .unwrap_or_else(|| PathBuf::from("connector.db"))
    }

    /// Looks up a backend by id.
    pub fn backend(&self, id: &BackendId) -> SyncResult<&BackendConfig> {
        self.backends
            .iter()
            .find(|b| &b.id == id)
            .ok_or_else(|| SyncError::UnknownBackend(id.to_string()))
    }

    /// Looks up the policy of a payment method.
    pub fn payment_mode(&self, name: &str) -> Option<&PaymentModePolicy> {
        self.payment_modes.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magento_core::{ApiVersion, ExternalId, InvoiceTrigger};

    const SAMPLE: &str = r#"
        [worker]
        poll_interval_secs = 2

        [[backends]]
        id = "mage"
        location = "https://shop.example.com"
        version = "1.7"
        create_invoice_on = "paid"

        [[backends.stores]]
        id = "1"
        create_invoice_on = "open"
        send_picking_done_mail = true

        [[backends.storeviews]]
        id = "2"
        code = "fr"
        lang = "fr_FR"

        [[payment_modes]]
        name = "checkmo"
        create_invoice_on = "open"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = ConnectorConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.worker.poll_interval_secs, 2);
        assert_eq!(config.worker.max_attempts, DEFAULT_MAX_ATTEMPTS);

        let backend = config.backend(&BackendId::new("mage")).unwrap();
        assert_eq!(backend.version, ApiVersion::V1_7);
        assert_eq!(
            backend.store_invoice_trigger(Some(&ExternalId::new("1"))),
            InvoiceTrigger::Open
        );
        assert!(backend.stores[0].send_picking_done_mail);
        assert_eq!(backend.storeviews[0].lang, "fr_FR");

        let mode = config.payment_mode("checkmo").unwrap();
        assert_eq!(mode.create_invoice_on, Some(InvoiceTrigger::Open));
        assert!(config.payment_mode("cashondelivery").is_none());
    }

    #[test]
    fn test_unknown_backend() {
        let config = ConnectorConfig::default();
        let err = config.backend(&BackendId::new("nope")).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ConnectorConfig::default();
        assert!(config.validate().is_ok());

        config
            .backends
            .push(BackendConfig::new("mage", "ftp://shop", ApiVersion::V2_0));
        assert!(config.validate().is_err());

        config.backends[0].location = "not a url".into();
        assert!(config.validate().is_err());

        config.backends[0].location = "http://shop.test".into();
        assert!(config.validate().is_ok());

        config
            .backends
            .push(BackendConfig::new("mage", "http://other.test", ApiVersion::V2_0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_validation() {
        let mut config = ConnectorConfig::default();
        config.worker.batch_size = 0;
        assert!(config.validate().is_err());

        config.worker.batch_size = 10;
        config.worker.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = ConnectorConfig::default();
        config
            .backends
            .push(BackendConfig::new("mage", "http://shop.test", ApiVersion::V2_0));
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[worker]"));
        assert!(toml_str.contains("[[backends]]"));
    }
}
