//! Session lifecycle: the component that represents the active session.
//!
//! `SessionCoordinator` owns the in-memory [`SessionContext`], keeps the registry
//! in step with it, and writes a snapshot after every state change so another
//! process (or this one after a restart) can pick the session back up.
//!
//! ```text
//! start_session ──► reap stale ──► register ──► snapshot
//! record_recall / surface_default_scars / confirm_scars ──► snapshot
//! close_session ──► retire (unregister + delete session storage) ──► reap stale
//! ```
//!
//! Snapshot writes are opportunistic: failures are logged and the operation
//! still succeeds. A closed or superseded session leaves nothing under
//! `sessions/<id>/`.

use serde::{Deserialize, Serialize};

use crate::compliance::{ComplianceTracker, Enforcement};
use crate::config::load_config;
use crate::error::{Result, ScarError};
use crate::reaper::StaleSessionReaper;
use crate::registry::{SessionEntry, SessionRegistry};
use crate::session::SessionContext;
use crate::snapshot::write_snapshot;
use crate::storage::{is_valid_session_id, StorageConfig};
use crate::types::{Confirmation, SurfacedScar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub agent: String,
    pub project: Option<String>,
    /// Caller-supplied id; a ULID is generated when absent.
    pub session_id: Option<String>,
    /// Process that owns the session; defaults to this process.
    pub pid: Option<u32>,
    /// Discard any in-memory session instead of resuming it.
    pub force: bool,
}

impl StartRequest {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            project: None,
            session_id: None,
            pid: None,
            force: false,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOutcome {
    pub session_id: String,
    /// An in-memory session already existed and was returned as-is.
    pub resumed: bool,
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOutcome {
    pub session_id: String,
    pub was_registered: bool,
    pub pruned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub accepted: Vec<String>,
    /// Scar ids that were never surfaced in this session.
    pub unknown: Vec<String>,
    /// Recalled scars still awaiting confirmation afterwards.
    pub outstanding: usize,
}

pub struct SessionCoordinator {
    registry: SessionRegistry,
    current: Option<SessionContext>,
}

impl SessionCoordinator {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    /// Coordinator over `storage` using the config stored there.
    pub fn open(storage: StorageConfig) -> Self {
        let config = load_config(&storage);
        Self::new(SessionRegistry::from_config(storage, &config))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn current(&self) -> Option<&SessionContext> {
        self.current.as_ref()
    }

    pub fn start_session(&mut self, request: StartRequest) -> Result<StartOutcome> {
        if let Some(existing) = &self.current {
            if !request.force {
                tracing::debug!(session_id = %existing.session_id, "Resuming active session");
                return Ok(StartOutcome {
                    session_id: existing.session_id.clone(),
                    resumed: true,
                    pruned: 0,
                });
            }
        }

        let session_id = match request.session_id {
            Some(id) if is_valid_session_id(&id) => id,
            Some(id) => return Err(ScarError::InvalidSessionId(id)),
            None => ulid::Ulid::new().to_string(),
        };

        let pruned = StaleSessionReaper::reap(&self.registry);

        // A forced start supersedes the previous session held by this coordinator.
        if let Some(previous) = self.current.take() {
            if previous.session_id != session_id {
                self.registry.retire(&previous.session_id)?;
            }
        }

        let context = SessionContext::new(&session_id, &request.agent, request.project.clone());
        self.registry.register(SessionEntry {
            session_id: session_id.clone(),
            hostname: self.registry.hostname().to_string(),
            pid: request.pid.unwrap_or_else(std::process::id),
            agent: request.agent,
            started_at: context.started_at,
            project: request.project,
        })?;

        tracing::info!(session_id = %session_id, forced = request.force, "Session started");
        self.current = Some(context);
        self.persist();

        Ok(StartOutcome {
            session_id,
            resumed: false,
            pruned,
        })
    }

    /// Appends pre-vetted default scars. Does not count as consulting recall.
    pub fn surface_default_scars(
        &mut self,
        scars: impl IntoIterator<Item = SurfacedScar>,
    ) -> Result<()> {
        self.active_mut()?.add_session_start_scars(scars);
        self.persist();
        Ok(())
    }

    /// Records a recall and the scars it surfaced.
    pub fn record_recall(&mut self, scars: impl IntoIterator<Item = SurfacedScar>) -> Result<()> {
        self.active_mut()?.record_recall(scars);
        self.persist();
        Ok(())
    }

    /// Records confirmations for surfaced scars. Unknown scar ids are reported, not stored.
    pub fn confirm_scars(
        &mut self,
        confirmations: impl IntoIterator<Item = Confirmation>,
    ) -> Result<ConfirmOutcome> {
        let context = self.active_mut()?;
        let mut outcome = ConfirmOutcome::default();
        for confirmation in confirmations {
            if context.has_surfaced(&confirmation.scar_id) {
                outcome.accepted.push(confirmation.scar_id.clone());
                context.confirm(confirmation);
            } else {
                outcome.unknown.push(confirmation.scar_id);
            }
        }
        outcome.outstanding = context.outstanding_scar_ids().len();
        if !outcome.unknown.is_empty() {
            tracing::warn!(unknown = ?outcome.unknown, "Confirmation for scars never surfaced");
        }
        self.persist();
        Ok(outcome)
    }

    pub fn close_session(&mut self) -> Result<CloseOutcome> {
        self.active_mut()?;
        let Some(context) = self.current.take() else {
            return Err(ScarError::NoActiveSession);
        };

        let was_registered = self.registry.retire(&context.session_id)?;
        let pruned = StaleSessionReaper::reap(&self.registry);

        tracing::info!(session_id = %context.session_id, was_registered, "Session closed");
        Ok(CloseOutcome {
            session_id: context.session_id,
            was_registered,
            pruned,
        })
    }

    /// Rebuilds the in-memory session from disk if none is held.
    /// Returns whether a session is active afterwards.
    pub fn recover_session(&mut self) -> bool {
        if self.current.is_none() {
            self.current = ComplianceTracker::new(&self.registry).recover_context();
            if let Some(context) = &self.current {
                tracing::info!(session_id = %context.session_id, "Session recovered from disk");
            }
        }
        self.current.is_some()
    }

    /// Drops in-memory state without touching disk, as a restart would.
    pub fn forget(&mut self) {
        self.current = None;
    }

    pub fn check_enforcement(&self, tool_name: &str) -> Enforcement {
        ComplianceTracker::new(&self.registry).check_enforcement(self.current.as_ref(), tool_name)
    }

    pub fn surfaced_scars(&self) -> Vec<SurfacedScar> {
        ComplianceTracker::new(&self.registry).get_surfaced_scars(self.current.as_ref())
    }

    fn active_mut(&mut self) -> Result<&mut SessionContext> {
        self.recover_session();
        self.current.as_mut().ok_or(ScarError::NoActiveSession)
    }

    fn persist(&self) {
        if let Some(context) = &self.current {
            persist_context(&self.registry, context);
        }
    }
}

fn persist_context(registry: &SessionRegistry, context: &SessionContext) {
    if let Err(err) = write_snapshot(
        registry.storage(),
        &context.session_id,
        &context.to_snapshot(),
    ) {
        tracing::warn!(
            session_id = %context.session_id,
            error = %err,
            "Failed to write session snapshot"
        );
    }
}
