//! Integration tests for registry pruning and lock-guarded mutation on a real host.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use scarlog_core::lock::{self, LockOptions, LockOwner};
use scarlog_core::process::local_hostname;
use scarlog_core::registry::REGISTRY_LOCK_NAME;
use scarlog_core::{ScarError, SessionEntry, SessionRegistry, StaleSessionReaper, StorageConfig};
use tempfile::tempdir;

fn entry(id: &str, pid: u32, host: &str, age: Duration) -> SessionEntry {
    SessionEntry {
        session_id: id.to_string(),
        hostname: host.to_string(),
        pid,
        agent: "cli".to_string(),
        started_at: Utc::now() - age,
        project: None,
    }
}

#[test]
fn test_reaper_uses_real_liveness() {
    let temp = tempdir().unwrap();
    let registry = SessionRegistry::new(StorageConfig::with_root(temp.path().to_path_buf()));
    let host = local_hostname();

    registry
        .register(entry("alive", std::process::id(), &host, Duration::hours(2)))
        .unwrap();
    registry
        .register(entry("dead", 99_999_999, &host, Duration::hours(1)))
        .unwrap();
    registry
        .register(entry("remote", 99_999_999, "some-other-host", Duration::hours(1)))
        .unwrap();

    assert_eq!(StaleSessionReaper::reap(&registry), 1);

    let mut ids: Vec<_> = registry.list().into_iter().map(|e| e.session_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["alive".to_string(), "remote".to_string()]);
}

#[test]
fn test_registry_mutation_proceeds_unlocked_after_lock_timeout() {
    let temp = tempdir().unwrap();
    let storage = StorageConfig::with_root(temp.path().to_path_buf());
    let registry = SessionRegistry::new(storage.clone());

    // Another process holds the registry lock and never lets go.
    let foreign = LockOwner::new(1, "another-host");
    let lock_path = storage.lock_file(REGISTRY_LOCK_NAME);
    let _held = lock::acquire_as(&lock_path, &foreign, &LockOptions::default()).unwrap();

    let quick = scarlog_core::ScarConfig {
        lock_timeout_ms: 50,
        lock_poll_interval_ms: 10,
        ..scarlog_core::ScarConfig::default()
    };
    let registry_with_short_wait = SessionRegistry::from_config(storage.clone(), &quick);

    // The write still lands.
    registry_with_short_wait
        .register(entry("s1", std::process::id(), "h", Duration::zero()))
        .unwrap();
    assert!(registry.find_by_id("s1").is_some());

    // The foreign lock is untouched.
    assert_eq!(lock::read_lock_record(&lock_path).unwrap().hostname, "another-host");
}

#[test]
fn test_registry_mutation_lands_after_foreign_lock_release() {
    let temp = tempdir().unwrap();
    let storage = StorageConfig::with_root(temp.path().to_path_buf());
    let lock_path = storage.lock_file(REGISTRY_LOCK_NAME);

    // Another process is midway through its own read-modify-write.
    let foreign = LockOwner::new(1, "another-host");
    let held = lock::acquire_as(&lock_path, &foreign, &LockOptions::default()).unwrap();

    let waiter_storage = storage.clone();
    let waiter = std::thread::spawn(move || {
        let patient = scarlog_core::ScarConfig {
            lock_timeout_ms: 5_000,
            lock_poll_interval_ms: 10,
            ..scarlog_core::ScarConfig::default()
        };
        let registry = SessionRegistry::from_config(waiter_storage, &patient);
        let started = std::time::Instant::now();
        registry
            .register(entry("waiter", std::process::id(), "h", Duration::zero()))
            .unwrap();
        started.elapsed()
    });

    std::thread::sleep(StdDuration::from_millis(150));
    // The holder's write, then its release.
    SessionRegistry::new(storage.clone())
        .without_mutation_lock()
        .register(entry("holder", 1, "another-host", Duration::zero()))
        .unwrap();
    held.release().unwrap();

    let waited = waiter.join().unwrap();
    assert!(waited >= StdDuration::from_millis(100), "waited only {waited:?}");

    let mut ids: Vec<_> = SessionRegistry::new(storage.clone())
        .list()
        .into_iter()
        .map(|e| e.session_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["holder".to_string(), "waiter".to_string()]);
    assert!(!lock_path.exists());
}

#[test]
fn test_out_of_range_max_age_does_not_prune_live_sessions() {
    let temp = tempdir().unwrap();
    let storage = StorageConfig::with_root(temp.path().to_path_buf());
    let config = scarlog_core::ScarConfig {
        session_max_age_hours: u64::MAX,
        ..scarlog_core::ScarConfig::default()
    };
    let registry = SessionRegistry::from_config(storage, &config);

    registry
        .register(entry("live", std::process::id(), &local_hostname(), Duration::hours(1)))
        .unwrap();

    assert_eq!(registry.prune_stale().unwrap(), 0);
    assert!(registry.find_by_id("live").is_some());
}

#[test]
fn test_lock_timeout_surfaces_to_callers() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("resource.lock");
    let _held = lock::acquire_as(&path, &LockOwner::new(1, "another-host"), &LockOptions::default())
        .unwrap();

    let options = LockOptions {
        timeout: StdDuration::from_millis(30),
        poll_interval: StdDuration::from_millis(10),
        ..LockOptions::default()
    };
    let result: scarlog_core::Result<()> = lock::with_lock(&path, &options, || Ok(()));
    match result {
        Err(ScarError::LockTimeout {
            holder_pid,
            holder_hostname,
            ..
        }) => {
            assert_eq!(holder_pid, 1);
            assert_eq!(holder_hostname, "another-host");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}
