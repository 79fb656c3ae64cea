//! # Coordinator Configuration
//!
//! Configuration management for the coordinator and the audit CLI.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KEYSTOCK_DB_PATH=/var/lib/keystock/keystock.db                     │
//! │     KEYSTOCK_AUDIT_INTERVAL_SECS=300                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/keystock/coordinator.toml (Linux)                        │
//! │     ~/Library/Application Support/com.keystock.coordinator/... (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # coordinator.toml
//! [database]
//! path = "keystock.db"
//! max_connections = 5
//!
//! [barcode]
//! prefix = 20        # leading two digits of generated EAN-13 codes
//! max_attempts = 8   # candidates tried before BarcodeExhausted
//!
//! [audit]
//! interval_secs = 300  # 0 disables the periodic scan
//! auto_repair = false
//!
//! [operations]
//! default_timeout_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CoordError, CoordResult};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the relational store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. `:memory:` gives a throwaway database.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Pool size shared by both write paths and the auditor.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "keystock.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Barcode Settings
// =============================================================================

/// Barcode generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeSettings {
    /// Two-digit prefix of generated codes (20-29 is the in-store range).
    #[serde(default = "default_prefix")]
    pub prefix: u8,

    /// Candidates tried per allocation before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_prefix() -> u8 {
    keystock_core::Ean13Symbology::DEFAULT_PREFIX
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for BarcodeSettings {
    fn default() -> Self {
        BarcodeSettings {
            prefix: default_prefix(),
            max_attempts: default_max_attempts(),
        }
    }
}

// =============================================================================
// Audit Settings
// =============================================================================

/// Periodic integrity audit settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Seconds between scheduled scans. 0 disables the scheduler.
    #[serde(default)]
    pub interval_secs: u64,

    /// Apply repairs after every scheduled scan that finds something.
    #[serde(default)]
    pub auto_repair: bool,
}

impl AuditSettings {
    /// Scan interval, `None` when disabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

// =============================================================================
// Operation Settings
// =============================================================================

/// Defaults applied to every coordinator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSettings {
    /// Deadline for a call that does not bring its own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for OperationSettings {
    fn default() -> Self {
        OperationSettings {
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl OperationSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

// =============================================================================
// Main Coordinator Configuration
// =============================================================================

/// Complete coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub barcode: BarcodeSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub operations: OperationSettings,
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (coordinator.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> CoordResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading coordinator config from file");
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
            warn!("Failed to load coordinator config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> CoordResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| CoordError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Coordinator config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CoordResult<()> {
        if self.database.path.trim().is_empty() {
            return Err(CoordError::Config("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(CoordError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.barcode.prefix > 99 {
            return Err(CoordError::Config(format!(
                "barcode.prefix must be two digits, got {}",
                self.barcode.prefix
            )));
        }

        if self.barcode.max_attempts == 0 {
            return Err(CoordError::Config(
                "barcode.max_attempts must be greater than 0".into(),
            ));
        }

        if self.operations.default_timeout_ms == 0 {
            return Err(CoordError::Config(
                "operations.default_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("KEYSTOCK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = path;
        }

        if let Ok(prefix) = std::env::var("KEYSTOCK_BARCODE_PREFIX") {
            if let Ok(p) = prefix.parse::<u8>() {
                debug!(prefix = p, "Overriding barcode prefix from environment");
                self.barcode.prefix = p;
            }
        }

        if let Ok(attempts) = std::env::var("KEYSTOCK_BARCODE_MAX_ATTEMPTS") {
            if let Ok(a) = attempts.parse::<u32>() {
                self.barcode.max_attempts = a;
            }
        }

        if let Ok(interval) = std::env::var("KEYSTOCK_AUDIT_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                debug!(secs, "Overriding audit interval from environment");
                self.audit.interval_secs = secs;
            }
        }

        if let Ok(repair) = std::env::var("KEYSTOCK_AUDIT_AUTO_REPAIR") {
            match repair.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.audit.auto_repair = true,
                "0" | "false" | "no" => self.audit.auto_repair = false,
                _ => warn!(value = %repair, "Unknown auto repair flag in environment"),
            }
        }

        if let Ok(timeout) = std::env::var("KEYSTOCK_OP_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.operations.default_timeout_ms = ms;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "keystock", "coordinator").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("coordinator.toml")
        })
    }

    /// Pool settings for the configured database.
    pub fn db_config(&self) -> keystock_db::DbConfig {
        if self.database.path == ":memory:" {
            keystock_db::DbConfig::in_memory()
        } else {
            keystock_db::DbConfig::new(&self.database.path)
                .max_connections(self.database.max_connections)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.database.path, "keystock.db");
        assert_eq!(config.barcode.prefix, 20);
        assert_eq!(config.barcode.max_attempts, 8);
        assert!(config.audit.interval().is_none());
        assert!(!config.audit.auto_repair);
        assert_eq!(config.operations.default_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            [audit]
            interval_secs = 60
            auto_repair = true
            "#,
        )
        .unwrap();

        assert_eq!(config.audit.interval(), Some(Duration::from_secs(60)));
        assert!(config.audit.auto_repair);
        assert_eq!(config.barcode.max_attempts, 8);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());

        config.barcode.max_attempts = 0;
        assert!(config.validate().is_err());

        config.barcode.max_attempts = 3;
        config.barcode.prefix = 120;
        assert!(config.validate().is_err());

        config.barcode.prefix = 21;
        config.database.path = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoordError::Config(_)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("keystock-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("coordinator.toml");

        let mut config = CoordinatorConfig::default();
        config.database.path = dir.join("k.db").display().to_string();
        config.audit.interval_secs = 30;
        config.save(Some(path.clone())).unwrap();

        let loaded = CoordinatorConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.audit.interval_secs, 30);
        assert_eq!(loaded.database.path, config.database.path);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_toml_serialization() {
        let config = CoordinatorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[audit]"));
    }
}
