//! Session subcommands. Each invocation is a fresh process, so the coordinator
//! recovers the active session from disk before acting on it.

use chrono::Utc;
use scarlog_core::process::{self, SystemProbe};
use scarlog_core::reaper::{self, Verdict};
use scarlog_core::{
    load_config, Confirmation, Decision, ScarSource, SessionCoordinator, StartRequest,
    StorageConfig, SurfacedScar,
};
use serde_json::json;

use crate::CliError;

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses `ID=TITLE`. A bare `ID` uses the id as its title.
pub fn parse_scar_arg(arg: &str, source: ScarSource) -> Result<SurfacedScar, CliError> {
    let (id, title) = match arg.split_once('=') {
        Some((id, title)) => (id.trim(), title.trim()),
        None => (arg.trim(), arg.trim()),
    };
    if id.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "scar must be ID or ID=TITLE, got '{arg}'"
        )));
    }
    Ok(SurfacedScar::new(id, title, source))
}

pub fn start(
    storage: &StorageConfig,
    agent: String,
    project: Option<String>,
    session_id: Option<String>,
    pid: Option<u32>,
    force: bool,
) -> Result<(), CliError> {
    let mut coordinator = SessionCoordinator::open(storage.clone());

    // The CLI exits immediately; the session belongs to whoever invoked it.
    let owner = pid
        .or_else(process::parent_pid)
        .unwrap_or_else(std::process::id);

    let mut request = StartRequest::new(agent).with_pid(owner);
    request.project = project;
    request.session_id = session_id;
    request.force = force;

    let outcome = coordinator.start_session(request)?;
    print_json(&outcome)
}

pub fn close(storage: &StorageConfig, session_id: Option<&str>) -> Result<(), CliError> {
    let mut coordinator = SessionCoordinator::open(storage.clone());

    if let Some(session_id) = session_id {
        let was_registered = coordinator.registry().retire(session_id)?;
        let pruned = scarlog_core::StaleSessionReaper::reap(coordinator.registry());
        tracing::info!(session_id, was_registered, "Session closed by id");
        return print_json(&json!({
            "session_id": session_id,
            "was_registered": was_registered,
            "pruned": pruned,
        }));
    }

    let outcome = coordinator.close_session()?;
    print_json(&outcome)
}

pub fn recall(storage: &StorageConfig, scars: &[String], defaults: bool) -> Result<(), CliError> {
    let source = if defaults {
        ScarSource::SessionStart
    } else {
        ScarSource::Recall
    };
    let scars = scars
        .iter()
        .map(|arg| parse_scar_arg(arg, source))
        .collect::<Result<Vec<_>, _>>()?;

    let mut coordinator = SessionCoordinator::open(storage.clone());
    let count = scars.len();
    if defaults {
        coordinator.surface_default_scars(scars)?;
    } else {
        coordinator.record_recall(scars)?;
    }

    let outstanding = coordinator
        .current()
        .map(|ctx| ctx.outstanding_scar_ids().len())
        .unwrap_or(0);
    print_json(&json!({ "recorded": count, "outstanding": outstanding }))
}

pub fn confirm(
    storage: &StorageConfig,
    scar_id: String,
    decision: &str,
    evidence: String,
) -> Result<(), CliError> {
    let decision: Decision = decision.parse().map_err(CliError::InvalidArgument)?;
    let mut coordinator = SessionCoordinator::open(storage.clone());
    let outcome = coordinator.confirm_scars([Confirmation::new(scar_id, decision, evidence)])?;
    print_json(&outcome)
}

pub fn check(storage: &StorageConfig, tool: &str) -> Result<(), CliError> {
    let mut coordinator = SessionCoordinator::open(storage.clone());
    coordinator.recover_session();
    print_json(&coordinator.check_enforcement(tool))
}

pub fn scars(storage: &StorageConfig) -> Result<(), CliError> {
    let coordinator = SessionCoordinator::open(storage.clone());
    print_json(&coordinator.surfaced_scars())
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Expired => "expired",
        Verdict::ProcessGone => "process_gone",
        Verdict::Alive => "alive",
        Verdict::Remote => "remote",
    }
}

pub fn list(storage: &StorageConfig) -> Result<(), CliError> {
    let config = load_config(storage);
    let coordinator = SessionCoordinator::open(storage.clone());
    let registry = coordinator.registry();
    let now = Utc::now();

    let rows: Vec<_> = registry
        .list()
        .into_iter()
        .map(|entry| {
            let verdict = reaper::assess(
                &entry,
                now,
                config.session_max_age(),
                registry.hostname(),
                &SystemProbe,
            );
            json!({
                "session_id": entry.session_id,
                "hostname": entry.hostname,
                "pid": entry.pid,
                "agent": entry.agent,
                "project": entry.project,
                "started_at": entry.started_at,
                "status": verdict_label(verdict),
            })
        })
        .collect();
    print_json(&rows)
}

pub fn prune(storage: &StorageConfig) -> Result<(), CliError> {
    let coordinator = SessionCoordinator::open(storage.clone());
    let pruned = coordinator.registry().prune_stale()?;
    print_json(&json!({ "pruned": pruned }))
}
