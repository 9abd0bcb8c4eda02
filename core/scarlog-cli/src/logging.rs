//! File logging for the CLI.
//!
//! Logs go to `<root>/logs/scarlog.log.YYYY-MM-DD` so hook invocations never
//! pollute the stdout that callers parse. Filter with `SCARLOG_LOG`
//! (EnvFilter syntax, default `info`).

use fs_err as fs;
use scarlog_core::StorageConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "SCARLOG_LOG";
const LOG_FILE_PREFIX: &str = "scarlog.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(storage: Option<&StorageConfig>) -> Option<WorkerGuard> {
    let logs_dir = storage.map(StorageConfig::logs_dir);

    if let Some(dir) = logs_dir.filter(|dir| fs::create_dir_all(dir).is_ok()) {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let installed = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(writer)
            .with_ansi(false)
            .try_init()
            .is_ok();
        return installed.then_some(guard);
    }

    // No writable log dir: fall back to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
    None
}
