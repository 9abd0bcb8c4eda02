//! Stale session reaping.
//!
//! There is no daemon to run a periodic sweep, so pruning piggybacks on session
//! lifecycle events: every start and close calls [`StaleSessionReaper::reap`].
//! Pruning is idempotent.
//!
//! The per-entry decision lives here ([`assess`]); [`SessionRegistry::prune_stale`]
//! applies it to the stored list.
//!
//! [`SessionRegistry::prune_stale`]: crate::registry::SessionRegistry::prune_stale

use chrono::{DateTime, Utc};

use crate::process::LivenessProbe;
use crate::registry::{SessionEntry, SessionRegistry};

/// Entries older than this are dropped without probing.
pub const DEFAULT_MAX_SESSION_AGE_HOURS: i64 = 24;

/// Why an entry is kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Older than the age threshold.
    Expired,
    /// Local host, and the process no longer exists.
    ProcessGone,
    /// Local host, process still running.
    Alive,
    /// Another host, not yet expired. Liveness cannot be checked from here.
    Remote,
}

impl Verdict {
    pub fn is_stale(self) -> bool {
        matches!(self, Verdict::Expired | Verdict::ProcessGone)
    }
}

/// Classifies a single registry entry.
///
/// Age is checked first so long-dead remote sessions still expire; the
/// liveness probe only runs for entries on `local_hostname`.
pub fn assess(
    entry: &SessionEntry,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
    local_hostname: &str,
    probe: &dyn LivenessProbe,
) -> Verdict {
    let age = now.signed_duration_since(entry.started_at);
    if age > max_age {
        return Verdict::Expired;
    }
    if entry.hostname != local_hostname {
        return Verdict::Remote;
    }
    if probe.is_alive(entry.pid) {
        Verdict::Alive
    } else {
        Verdict::ProcessGone
    }
}

/// Decides when to prune. Owns no state of its own.
pub struct StaleSessionReaper;

impl StaleSessionReaper {
    /// Prunes the registry, logging instead of failing.
    ///
    /// Reaping is housekeeping attached to another operation; a failure here
    /// must not fail that operation.
    pub fn reap(registry: &SessionRegistry) -> usize {
        match registry.prune_stale() {
            Ok(0) => 0,
            Ok(count) => {
                tracing::info!(pruned = count, "Pruned stale sessions");
                count
            }
            Err(err) => {
                tracing::warn!(error = %err, "Stale session pruning failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct FixedProbe(bool);

    impl LivenessProbe for FixedProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            self.0
        }
    }

    fn entry(host: &str, age: Duration) -> SessionEntry {
        SessionEntry {
            session_id: "s".to_string(),
            hostname: host.to_string(),
            pid: 100,
            agent: "cli".to_string(),
            started_at: Utc::now() - age,
            project: None,
        }
    }

    fn max_age() -> Duration {
        Duration::hours(DEFAULT_MAX_SESSION_AGE_HOURS)
    }

    #[test]
    fn test_expired_regardless_of_liveness() {
        let e = entry("here", Duration::hours(25));
        let verdict = assess(&e, Utc::now(), max_age(), "here", &FixedProbe(true));
        assert_eq!(verdict, Verdict::Expired);
        assert!(verdict.is_stale());
    }

    #[test]
    fn test_expired_remote_entry() {
        let e = entry("elsewhere", Duration::hours(30));
        let verdict = assess(&e, Utc::now(), max_age(), "here", &FixedProbe(true));
        assert_eq!(verdict, Verdict::Expired);
    }

    #[test]
    fn test_local_dead_process() {
        let e = entry("here", Duration::hours(1));
        let verdict = assess(&e, Utc::now(), max_age(), "here", &FixedProbe(false));
        assert_eq!(verdict, Verdict::ProcessGone);
        assert!(verdict.is_stale());
    }

    #[test]
    fn test_local_live_process() {
        let e = entry("here", Duration::hours(1));
        let verdict = assess(&e, Utc::now(), max_age(), "here", &FixedProbe(true));
        assert_eq!(verdict, Verdict::Alive);
        assert!(!verdict.is_stale());
    }

    #[test]
    fn test_remote_entry_is_never_probed() {
        struct PanicProbe;
        impl LivenessProbe for PanicProbe {
            fn is_alive(&self, _pid: u32) -> bool {
                panic!("remote entries must not be probed");
            }
        }

        let e = entry("elsewhere", Duration::hours(23));
        let verdict = assess(&e, Utc::now(), max_age(), "here", &PanicProbe);
        assert_eq!(verdict, Verdict::Remote);
        assert!(!verdict.is_stale());
    }
}
