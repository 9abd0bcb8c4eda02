//! # scarlog-core
//!
//! Session coordination for the scarlog memory server: which sessions are
//! active across independent server processes, whether an agent has honoured
//! the recall → confirm → act discipline, and how to pick a session back up
//! after a process loses its memory.
//!
//! ## Design Principles
//!
//! - **No daemon, no database**: all shared state is plain JSON files under one
//!   directory tree, coordinated with atomic renames and advisory lock files.
//! - **Synchronous**: every operation runs on the caller's thread. Only
//!   [`lock::acquire`] ever waits.
//! - **Graceful degradation**: corrupt or missing files read as empty, never as
//!   errors. Only terminal I/O failures and lock timeouts propagate.
//! - **Explicit session context**: workflow state is an owned [`SessionContext`],
//!   not a process-wide global.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scarlog_core::{SessionCoordinator, StartRequest, StorageConfig};
//!
//! let mut coordinator = SessionCoordinator::open(StorageConfig::from_env()?);
//! coordinator.start_session(StartRequest::new("cli").with_project("api"))?;
//! if let Some(warning) = coordinator.check_enforcement("create_learning").warning {
//!     eprintln!("{warning}");
//! }
//! ```

pub mod compliance;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod process;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod tools;
pub mod types;

// Re-export commonly used items at crate root
pub use compliance::{check_enforcement, ComplianceTracker, Enforcement};
pub use config::{load_config, save_config, ScarConfig};
pub use coordinator::{CloseOutcome, ConfirmOutcome, SessionCoordinator, StartOutcome, StartRequest};
pub use error::{Result, ScarError};
pub use lock::{LockGuard, LockOptions, LockOwner, LockRecord};
pub use reaper::StaleSessionReaper;
pub use registry::{SessionEntry, SessionRegistry};
pub use session::SessionContext;
pub use snapshot::{read_snapshot, write_snapshot, SessionSnapshot};
pub use storage::StorageConfig;
pub use tools::canonical_tool_name;
pub use types::*;
