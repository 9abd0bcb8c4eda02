//! Per-session snapshot documents.
//!
//! Location: `~/.scarlog/sessions/{session_id}/session.json`. Writers may be
//! other components entirely, so reading is lenient: only `surfaced_scars` is
//! required, and anything unreadable reads as "no snapshot".

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScarError};
use crate::registry::write_atomic;
use crate::storage::StorageConfig;
use crate::types::{Confirmation, SurfacedScar};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_called: Option<bool>,
    pub surfaced_scars: Vec<SurfacedScar>,
    #[serde(default)]
    pub confirmations: Vec<Confirmation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Reads a session's snapshot. Missing, corrupt, or unsafe ids yield `None`.
pub fn read_snapshot(storage: &StorageConfig, session_id: &str) -> Option<SessionSnapshot> {
    let path = match storage.session_snapshot_file(session_id) {
        Ok(path) => path,
        Err(err) => {
            tracing::debug!(error = %err, "No snapshot path for session");
            return None;
        }
    };

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(error = %err, "Failed to read session snapshot");
            }
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::debug!(
                path = %path.display(),
                error = %err,
                "Unparseable session snapshot"
            );
            None
        }
    }
}

/// Writes a session's snapshot atomically (temp + rename).
pub fn write_snapshot(
    storage: &StorageConfig,
    session_id: &str,
    snapshot: &SessionSnapshot,
) -> Result<()> {
    let dir = storage.session_dir(session_id)?;
    fs::create_dir_all(&dir).map_err(|e| ScarError::io("create session dir", e))?;

    let content = serde_json::to_string_pretty(snapshot)
        .map_err(|e| ScarError::json("serialize session snapshot", e))?;
    let path = storage.session_snapshot_file(session_id)?;
    write_atomic(&dir, &path, content.as_bytes())
        .map_err(|e| ScarError::io(format!("write snapshot {}", path.display()), e))
}
