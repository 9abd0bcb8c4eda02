//! Storage configuration and path management for scarlog.
//!
//! Every file this crate touches is derived from a single root directory:
//!
//! ```text
//! ~/.scarlog/
//! ├── active-sessions.json      # SessionRegistry document
//! ├── config.json               # ScarConfig
//! ├── locks/{md5}.lock          # AdvisoryLock records
//! ├── logs/                     # CLI log files
//! └── sessions/{session_id}/    # per-session storage subtree
//!     └── session.json          # per-session snapshot
//! ```
//!
//! Production code uses `StorageConfig::from_env()` (honours `SCARLOG_HOME`).
//! Tests use `StorageConfig::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, ScarError};

/// Environment variable that overrides the storage root.
pub const HOME_ENV_VAR: &str = "SCARLOG_HOME";

static SESSION_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("session id pattern is valid")
});

/// Returns true if `session_id` is safe to use as a directory name.
///
/// Session ids are opaque, but they end up in filesystem paths, so anything
/// that could escape the sessions directory is rejected.
pub fn is_valid_session_id(session_id: &str) -> bool {
    SESSION_ID_PATTERN.is_match(session_id) && !session_id.contains("..")
}

/// Central configuration for all scarlog storage paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Root directory for all scarlog data (default: ~/.scarlog)
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the root from `SCARLOG_HOME`, falling back to `~/.scarlog`.
    pub fn from_env() -> Result<Self> {
        if let Some(root) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(ScarError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(".scarlog")))
    }

    /// Creates a StorageConfig with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the root directory for scarlog data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Global Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to active-sessions.json (the session registry document).
    pub fn registry_file(&self) -> PathBuf {
        self.root.join("active-sessions.json")
    }

    /// Path to config.json (tunables).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to sessions/ directory (per-session storage subtrees).
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Path to locks/ directory (advisory lock records).
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Path to logs/ directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Per-Session Paths
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to a session's storage subtree.
    /// Example: ~/.scarlog/sessions/01J9Z3.../
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        if !is_valid_session_id(session_id) {
            return Err(ScarError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.sessions_dir().join(session_id))
    }

    /// Path to a session's snapshot document.
    /// Example: ~/.scarlog/sessions/01J9Z3.../session.json
    pub fn session_snapshot_file(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join("session.json"))
    }

    /// Path to the lock record guarding a named resource.
    ///
    /// Names are hashed so arbitrary resource names map to flat, fixed-length
    /// file names: `{md5}.lock`.
    pub fn lock_file(&self, resource: &str) -> PathBuf {
        self.locks_dir()
            .join(format!("{:x}.lock", md5::compute(resource.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/scar-test"));
        assert_eq!(config.root(), Path::new("/tmp/scar-test"));
        assert_eq!(
            config.registry_file(),
            PathBuf::from("/tmp/scar-test/active-sessions.json")
        );
        assert_eq!(
            config.session_snapshot_file("abc-123").unwrap(),
            PathBuf::from("/tmp/scar-test/sessions/abc-123/session.json")
        );
    }

    #[test]
    fn test_lock_file_is_stable_and_distinct() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/scar-test"));
        let a = config.lock_file("active-sessions");
        assert_eq!(a, config.lock_file("active-sessions"));
        assert_ne!(a, config.lock_file("other"));
        assert_eq!(a.extension().unwrap(), "lock");
        assert!(a.starts_with("/tmp/scar-test/locks"));
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("01J9Z3K4ABCDEF"));
        assert!(is_valid_session_id("session_a.2"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id("a/b"));
        assert!(!is_valid_session_id("a..b"));
        assert!(!is_valid_session_id(".hidden"));
    }

    #[test]
    fn test_session_dir_rejects_traversal() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/scar-test"));
        assert!(matches!(
            config.session_dir("../../root"),
            Err(ScarError::InvalidSessionId(_))
        ));
    }
}
