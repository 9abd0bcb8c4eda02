//! Error types for scarlog-core operations.
//!
//! Most failures in this crate are deliberately non-fatal (corrupt registry,
//! missing snapshot, failed rename) and never surface here. What remains are
//! terminal I/O failures and the lock timeout, which callers must handle.

use std::path::PathBuf;

/// All errors that can occur in scarlog-core operations.
#[derive(Debug, thiserror::Error)]
pub enum ScarError {
    // ─────────────────────────────────────────────────────────────────────
    // Lock Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error(
        "Timed out after {waited_ms}ms waiting for lock {path}: held by pid {holder_pid} on {holder_hostname} for {age_ms}ms"
    )]
    LockTimeout {
        path: PathBuf,
        holder_pid: u32,
        holder_hostname: String,
        age_ms: i64,
        waited_ms: u64,
    },

    #[error("Lock {path} is no longer held by this owner")]
    LockLost { path: PathBuf },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("No active session")]
    NoActiveSession,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ScarError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ScarError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        ScarError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using ScarError.
pub type Result<T> = std::result::Result<T, ScarError>;

// Conversion for string error compatibility
impl From<ScarError> for String {
    fn from(err: ScarError) -> String {
        err.to_string()
    }
}
