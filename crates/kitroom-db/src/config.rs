//! # Store Configuration
//!
//! Where the store file and snapshots live, and how long callers wait.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KITROOM_DB_PATH=/var/lib/kitroom/kitroom.db                        │
//! │     KITROOM_BACKUP_DIR=/var/lib/kitroom/backups                        │
//! │                                                                         │
//! │  2. TOML Config File (--config <path>)                                 │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     ./kitroom.db, backups next to the store file                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kitroom.toml
//! [database]
//! path = "/var/lib/kitroom/kitroom.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [snapshots]
//! backup_dir = "/var/lib/kitroom/backups"   # default: <store dir>/backups
//!
//! [store]
//! unavailable_timeout_ms = 2000   # wait for a running restore, then fail
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the store file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for SQLite's write lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("kitroom.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// `[snapshots]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    /// Backup directory. `None` means `backups` next to the store file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// How long a request waits for a running restore (milliseconds).
    #[serde(default = "default_unavailable_timeout")]
    pub unavailable_timeout_ms: u64,
}

fn default_unavailable_timeout() -> u64 {
    2_000
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            unavailable_timeout_ms: default_unavailable_timeout(),
        }
    }
}

// =============================================================================
// Kitroom Config
// =============================================================================

/// Complete store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitroomConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub snapshots: SnapshotSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl KitroomConfig {
    /// Loads configuration: defaults, then the file (if given and present),
    /// then environment variables. The result is validated.
    pub fn load(config_path: Option<&Path>) -> DbResult<Self> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading config from file");
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml(&contents)?
            }
            Some(path) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document. Missing sections and keys take defaults.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::Config("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if let Some(dir) = &self.snapshots.backup_dir {
            if dir.as_os_str().is_empty() {
                return Err(DbError::Config("snapshots.backup_dir must not be empty".into()));
            }
        }

        Ok(())
    }

    /// Applies `KITROOM_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KITROOM_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(dir) = lookup("KITROOM_BACKUP_DIR") {
            debug!(dir = %dir, "Overriding backup directory from environment");
            self.snapshots.backup_dir = Some(PathBuf::from(dir));
        }

        if let Some(value) = lookup("KITROOM_MAX_CONNECTIONS") {
            match value.parse() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid KITROOM_MAX_CONNECTIONS"),
            }
        }

        if let Some(value) = lookup("KITROOM_BUSY_TIMEOUT_MS") {
            match value.parse() {
                Ok(ms) => self.database.busy_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid KITROOM_BUSY_TIMEOUT_MS"),
            }
        }

        if let Some(value) = lookup("KITROOM_UNAVAILABLE_TIMEOUT_MS") {
            match value.parse() {
                Ok(ms) => self.store.unavailable_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid KITROOM_UNAVAILABLE_TIMEOUT_MS"),
            }
        }
    }

    // =========================================================================
    // Derived settings
    // =========================================================================

    /// Pool settings for the store file.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// The backup directory, defaulting to `backups` beside the store file.
    pub fn backup_dir(&self) -> PathBuf {
        match &self.snapshots.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .database
                .path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join("backups"),
        }
    }

    pub fn unavailable_timeout(&self) -> Duration {
        Duration::from_millis(self.store.unavailable_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = KitroomConfig::default();
        assert_eq!(config.database.path, PathBuf::from("kitroom.db"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.backup_dir(), PathBuf::from("backups"));
        assert_eq!(config.unavailable_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config = KitroomConfig::from_toml(
            r#"
            [database]
            path = "/srv/kitroom/store.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/srv/kitroom/store.db"));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/kitroom/backups"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = KitroomConfig::from_toml("[database\npath = 1").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = KitroomConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = KitroomConfig::default();
        config.database.path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KITROOM_DB_PATH", "/tmp/k.db"),
            ("KITROOM_BACKUP_DIR", "/tmp/snaps"),
            ("KITROOM_MAX_CONNECTIONS", "not-a-number"),
            ("KITROOM_UNAVAILABLE_TIMEOUT_MS", "250"),
        ]);

        let mut config = KitroomConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/k.db"));
        assert_eq!(config.backup_dir(), PathBuf::from("/tmp/snaps"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.unavailable_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_db_config() {
        let mut config = KitroomConfig::default();
        config.database.busy_timeout_ms = 750;
        let db = config.db_config();
        assert_eq!(db.busy_timeout, Duration::from_millis(750));
        assert_eq!(db.database_path, PathBuf::from("kitroom.db"));
    }

    #[test]
    fn test_toml_serialization() {
        let config = KitroomConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = KitroomConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
