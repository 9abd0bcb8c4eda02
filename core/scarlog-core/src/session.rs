//! Process-local workflow state for one session.
//!
//! A [`SessionContext`] is owned by whatever represents the active session
//! (normally [`SessionCoordinator`]) and passed explicitly to the compliance
//! tracker. Nothing here is global, so one process can hold several sessions.
//!
//! [`SessionCoordinator`]: crate::coordinator::SessionCoordinator

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::registry::SessionEntry;
use crate::snapshot::SessionSnapshot;
use crate::types::{Confirmation, ScarSource, SurfacedScar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub agent: String,
    pub project: Option<String>,
    pub started_at: DateTime<Utc>,
    pub recall_called: bool,
    pub surfaced_scars: Vec<SurfacedScar>,
    pub confirmations: Vec<Confirmation>,
}

impl SessionContext {
    /// Fresh state for a newly started session.
    pub fn new(
        session_id: impl Into<String>,
        agent: impl Into<String>,
        project: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent: agent.into(),
            project,
            started_at: Utc::now(),
            recall_called: false,
            surfaced_scars: Vec::new(),
            confirmations: Vec::new(),
        }
    }

    /// Rebuilds state from the registry entry and, if available, its snapshot.
    pub fn restore(entry: &SessionEntry, snapshot: Option<SessionSnapshot>) -> Self {
        let mut context = Self {
            session_id: entry.session_id.clone(),
            agent: entry.agent.clone(),
            project: entry.project.clone(),
            started_at: entry.started_at,
            recall_called: false,
            surfaced_scars: Vec::new(),
            confirmations: Vec::new(),
        };
        if let Some(snapshot) = snapshot {
            // Older snapshots lack the flag; a recalled scar implies recall ran.
            context.recall_called = snapshot.recall_called.unwrap_or_else(|| {
                snapshot
                    .surfaced_scars
                    .iter()
                    .any(|scar| scar.source == ScarSource::Recall)
            });
            context.surfaced_scars = snapshot.surfaced_scars;
            context.confirmations = snapshot.confirmations;
        }
        context
    }

    /// Appends recalled scars and marks recall as consulted, even if nothing surfaced.
    pub fn record_recall(&mut self, scars: impl IntoIterator<Item = SurfacedScar>) {
        self.recall_called = true;
        self.append_scars(scars, ScarSource::Recall);
    }

    /// Appends bootstrap defaults. Does not count as consulting recall.
    pub fn add_session_start_scars(&mut self, scars: impl IntoIterator<Item = SurfacedScar>) {
        self.append_scars(scars, ScarSource::SessionStart);
    }

    fn append_scars(&mut self, scars: impl IntoIterator<Item = SurfacedScar>, source: ScarSource) {
        for mut scar in scars {
            scar.source = source;
            let duplicate = self
                .surfaced_scars
                .iter()
                .any(|existing| existing.scar_id == scar.scar_id && existing.source == source);
            if !duplicate {
                self.surfaced_scars.push(scar);
            }
        }
    }

    pub fn confirm(&mut self, confirmation: Confirmation) {
        self.confirmations.push(confirmation);
    }

    pub fn has_surfaced(&self, scar_id: &str) -> bool {
        self.surfaced_scars.iter().any(|scar| scar.scar_id == scar_id)
    }

    /// Recalled scar ids with no confirmation, in surfacing order.
    /// Session-start scars are never outstanding.
    pub fn outstanding_scar_ids(&self) -> Vec<&str> {
        let confirmed: HashSet<&str> = self
            .confirmations
            .iter()
            .map(|c| c.scar_id.as_str())
            .collect();
        let mut seen = HashSet::new();
        self.surfaced_scars
            .iter()
            .filter(|scar| scar.source == ScarSource::Recall)
            .map(|scar| scar.scar_id.as_str())
            .filter(|id| !confirmed.contains(id) && seen.insert(*id))
            .collect()
    }

    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(self.session_id.clone()),
            agent: Some(self.agent.clone()),
            project: self.project.clone(),
            started_at: Some(self.started_at),
            recall_called: Some(self.recall_called),
            surfaced_scars: self.surfaced_scars.clone(),
            confirmations: self.confirmations.clone(),
            updated_at: Some(Utc::now()),
        }
    }
}
