//! Lock subcommands over named resources under `<root>/locks/`.

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use scarlog_core::lock;
use scarlog_core::process::is_pid_alive;
use scarlog_core::{load_config, StorageConfig};
use serde_json::json;

use crate::CliError;

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn status(storage: &StorageConfig, name: &str) -> Result<(), CliError> {
    let path = storage.lock_file(name);
    let status = match lock::read_lock_record(&path) {
        Some(record) => {
            let stale_after = load_config(storage).lock_options().stale_after;
            let age = record.age(Utc::now());
            json!({
                "resource": name,
                "path": path,
                "held": true,
                "pid": record.pid,
                "hostname": record.hostname,
                "acquired_at": record.acquired_at,
                "age_ms": age.num_milliseconds(),
                "stale": record.is_stale(Utc::now(), stale_after),
                "holder_alive": record.hostname == scarlog_core::process::local_hostname()
                    && is_pid_alive(record.pid),
            })
        }
        None => json!({ "resource": name, "path": path, "held": path.exists() }),
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub fn release(storage: &StorageConfig, name: &str) -> Result<(), CliError> {
    let path = storage.lock_file(name);
    lock::release(&path)?;
    tracing::info!(resource = name, path = %path.display(), "Lock released by request");
    Ok(())
}

/// Runs `command` while holding the lock and returns its exit code.
///
/// The record is refreshed every third of `stale_after` while the child runs, so
/// other processes never break it as stale. If the record is taken over anyway,
/// the child keeps running and a warning is logged.
pub fn run(
    storage: &StorageConfig,
    name: &str,
    timeout_ms: Option<u64>,
    command: &[String],
) -> Result<i32, CliError> {
    let Some((program, args)) = command.split_first() else {
        return Err(CliError::InvalidArgument("no command given".to_string()));
    };

    let mut options = load_config(storage).lock_options();
    if let Some(ms) = timeout_ms {
        options.timeout = Duration::from_millis(ms);
    }

    let path = storage.lock_file(name);
    let mut guard = lock::acquire(&path, &options)?;
    tracing::info!(resource = name, program = %program, "Running under lock");

    let spawn_error = |source| CliError::Spawn {
        command: program.clone(),
        source,
    };
    let mut child = Command::new(program).args(args).spawn().map_err(spawn_error)?;

    let refresh_every = (options.stale_after / 3).max(CHILD_POLL_INTERVAL);
    let mut refreshed_at = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(spawn_error)? {
            break status;
        }
        if refreshed_at.elapsed() >= refresh_every {
            if let Err(err) = guard.refresh() {
                tracing::warn!(resource = name, error = %err, "Could not refresh lock");
            }
            refreshed_at = Instant::now();
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    };

    guard.release()?;
    // Killed by a signal: report the conventional shell code.
    Ok(status.code().unwrap_or(128))
}
