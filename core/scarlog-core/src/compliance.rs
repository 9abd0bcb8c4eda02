//! Workflow compliance: consult memory, confirm relevance, then act.
//!
//! The tracker is advisory. The dispatch layer asks [`ComplianceTracker::check_enforcement`]
//! before executing a tool and decides what to do with the warning; nothing here
//! blocks execution.
//!
//! # Decision Order
//!
//! ```text
//! resolve alias → exempt?            → no warning
//!               → no session?        → "start a session" (session-required tools)
//!               → recall never ran?  → "memory not consulted" (consequential tools)
//!               → unconfirmed scars? → "N await confirmation" (consequential tools)
//!               → otherwise          → no warning
//! ```
//!
//! # Recovery
//!
//! Session state lives in process memory and is lost on restart. When no context
//! is present, [`ComplianceTracker::get_surfaced_scars`] falls back to the
//! registry (most recent session on this host) and that session's snapshot.
//! Recovery is single-candidate and best-effort: it never merges concurrent
//! sessions, and any I/O or parse failure reads as "nothing to recover".

use serde::{Deserialize, Serialize};

use crate::registry::SessionRegistry;
use crate::session::SessionContext;
use crate::snapshot::read_snapshot;
use crate::tools::{self, canonical_tool_name};
use crate::types::SurfacedScar;

/// Result of an enforcement check, as returned to the dispatch layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enforcement {
    pub warning: Option<String>,
}

impl Enforcement {
    fn ok() -> Self {
        Self { warning: None }
    }

    fn warn(message: String) -> Self {
        Self {
            warning: Some(message),
        }
    }

    pub fn is_clear(&self) -> bool {
        self.warning.is_none()
    }
}

/// Decides whether `tool_name` may run without a warning given `session`.
pub fn check_enforcement(session: Option<&SessionContext>, tool_name: &str) -> Enforcement {
    let tool = canonical_tool_name(tool_name);

    if tools::is_exempt(tool) {
        return Enforcement::ok();
    }

    let Some(session) = session else {
        if tools::requires_session(tool) {
            return Enforcement::warn(format!(
                "No active session. Call {} before {tool} so this work is tracked.",
                tools::SESSION_START
            ));
        }
        return Enforcement::ok();
    };

    if !tools::is_consequential(tool) {
        return Enforcement::ok();
    }

    if !session.recall_called {
        return Enforcement::warn(format!(
            "Institutional memory was not consulted: {} has not been called in session {} \
             before {tool}. Run {} with your plan first.",
            tools::RECALL,
            session.session_id,
            tools::RECALL
        ));
    }

    let outstanding = session.outstanding_scar_ids();
    if !outstanding.is_empty() {
        return Enforcement::warn(format!(
            "Recalled scars unconfirmed: {} await confirmation ({}). Call {} with \
             APPLYING, N_A, or REFUTED for each before {tool}.",
            outstanding.len(),
            outstanding.join(", "),
            tools::CONFIRM_SCARS
        ));
    }

    Enforcement::ok()
}

/// Compliance queries with registry-backed recovery.
pub struct ComplianceTracker<'a> {
    registry: &'a SessionRegistry,
}

impl<'a> ComplianceTracker<'a> {
    pub fn new(registry: &'a SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn check_enforcement(
        &self,
        session: Option<&SessionContext>,
        tool_name: &str,
    ) -> Enforcement {
        let enforcement = check_enforcement(session, tool_name);
        if let Some(warning) = &enforcement.warning {
            tracing::debug!(
                tool = %tool_name,
                session_id = session.map(|s| s.session_id.as_str()).unwrap_or("-"),
                warning = %warning,
                "Compliance warning"
            );
        }
        enforcement
    }

    /// Surfaced scars for `session`, or for the session recovered from disk.
    pub fn get_surfaced_scars(&self, session: Option<&SessionContext>) -> Vec<SurfacedScar> {
        if let Some(session) = session {
            return session.surfaced_scars.clone();
        }
        self.recover_context()
            .map(|context| context.surfaced_scars)
            .unwrap_or_default()
    }

    /// Rebuilds the most recent local session from the registry and its snapshot.
    pub fn recover_context(&self) -> Option<SessionContext> {
        let entry = self.registry.most_recent_on_host(self.registry.hostname())?;
        let snapshot = read_snapshot(self.registry.storage(), &entry.session_id);
        tracing::debug!(
            session_id = %entry.session_id,
            has_snapshot = snapshot.is_some(),
            "Recovered session from registry"
        );
        Some(SessionContext::restore(&entry, snapshot))
    }
}
