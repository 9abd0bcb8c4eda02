//! Configuration loading and saving.
//!
//! Every field has a serde default so partial files work. A missing or corrupt
//! config file yields defaults; configuration must never block a session.

use std::path::Path;
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScarError};
use crate::lock::LockOptions;
use crate::reaper::DEFAULT_MAX_SESSION_AGE_HOURS;
use crate::storage::StorageConfig;

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

fn default_lock_stale_after_ms() -> u64 {
    30_000
}

fn default_session_max_age_hours() -> u64 {
    24
}

fn default_true() -> bool {
    true
}

/// Tunables for locks, pruning, and registry discipline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScarConfig {
    /// Maximum cumulative wait in `AdvisoryLock::acquire`.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
    /// Lock records older than this are force-broken.
    #[serde(default = "default_lock_stale_after_ms")]
    pub lock_stale_after_ms: u64,
    /// Registry entries older than this are pruned regardless of liveness.
    #[serde(default = "default_session_max_age_hours")]
    pub session_max_age_hours: u64,
    /// Bracket registry read-modify-write cycles with the advisory lock.
    #[serde(default = "default_true")]
    pub lock_registry_mutations: bool,
}

impl Default for ScarConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_stale_after_ms: default_lock_stale_after_ms(),
            session_max_age_hours: default_session_max_age_hours(),
            lock_registry_mutations: true,
        }
    }
}

impl ScarConfig {
    /// Lock options derived from this configuration.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            poll_interval: Duration::from_millis(self.lock_poll_interval_ms),
            stale_after: Duration::from_millis(self.lock_stale_after_ms),
        }
    }

    /// Registry entry age limit. Values chrono cannot represent fall back to the
    /// default.
    pub fn session_max_age(&self) -> chrono::Duration {
        i64::try_from(self.session_max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or_else(|| {
                tracing::warn!(
                    session_max_age_hours = self.session_max_age_hours,
                    default_hours = DEFAULT_MAX_SESSION_AGE_HOURS,
                    "session_max_age_hours out of range, using default"
                );
                chrono::Duration::hours(DEFAULT_MAX_SESSION_AGE_HOURS)
            })
    }
}

/// Loads the configuration, returning defaults if the file doesn't exist or is unreadable.
pub fn load_config(storage: &StorageConfig) -> ScarConfig {
    load_config_from(&storage.config_file())
}

fn load_config_from(path: &Path) -> ScarConfig {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ScarConfig::default(),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read config, using defaults");
            return ScarConfig::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Malformed config, using defaults"
            );
            ScarConfig::default()
        }
    }
}

/// Saves the configuration to disk.
pub fn save_config(storage: &StorageConfig, config: &ScarConfig) -> Result<()> {
    let path = storage.config_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ScarError::io("create config dir", e))?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ScarError::json("serialize config", e))?;
    fs::write(&path, content).map_err(|e| ScarError::io("write config", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_yields_defaults() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        assert_eq!(load_config(&storage), ScarConfig::default());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.config_file(), r#"{"lock_timeout_ms": 250}"#).unwrap();

        let config = load_config(&storage);
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.lock_stale_after_ms, 30_000);
        assert!(config.lock_registry_mutations);
    }

    #[test]
    fn test_corrupt_config_yields_defaults() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.config_file(), "{not json").unwrap();
        assert_eq!(load_config(&storage), ScarConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().join("nested"));
        let config = ScarConfig {
            session_max_age_hours: 6,
            lock_registry_mutations: false,
            ..ScarConfig::default()
        };
        save_config(&storage, &config).unwrap();
        assert_eq!(load_config(&storage), config);
    }

    #[test]
    fn test_lock_options_conversion() {
        let options = ScarConfig::default().lock_options();
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert_eq!(options.stale_after, Duration::from_secs(30));
    }

    #[test]
    fn test_out_of_range_max_age_falls_back_to_default() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let default_age = chrono::Duration::hours(DEFAULT_MAX_SESSION_AGE_HOURS);

        for hours in ["18446744073709551615", "1000000000000000"] {
            std::fs::write(
                storage.config_file(),
                format!(r#"{{"session_max_age_hours": {hours}}}"#),
            )
            .unwrap();
            let config = load_config(&storage);
            assert_eq!(config.session_max_age(), default_age, "hours = {hours}");
        }
    }

    #[test]
    fn test_large_representable_max_age_is_kept() {
        let config = ScarConfig {
            session_max_age_hours: 24 * 365,
            ..ScarConfig::default()
        };
        assert_eq!(config.session_max_age(), chrono::Duration::days(365));
    }
}
