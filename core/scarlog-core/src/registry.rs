//! File-backed registry of active sessions.
//!
//! The registry answers "which sessions exist?" for every process on every host
//! that shares the storage root, independent of any single process's memory.
//!
//! # File Format
//!
//! ```json
//! {
//!   "sessions": [
//!     { "session_id": "01J9...", "hostname": "devbox", "pid": 4242,
//!       "agent": "cli", "started_at": "2025-01-01T12:00:00Z", "project": "api" }
//!   ]
//! }
//! ```
//!
//! # Degradation
//!
//! Reads and writes degrade rather than fail:
//! - Missing, empty, corrupt, or schema-invalid documents read as an empty registry
//!   (with a warning). Corruption never blocks forward progress.
//! - Writes go through temp file + rename in the same directory. If the rename
//!   fails, the document is overwritten in place (with a warning).
//! - Mutations are bracketed by an advisory lock when enabled; if the lock cannot
//!   be obtained in time the mutation proceeds unlocked.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::ScarConfig;
use crate::error::{Result, ScarError};
use crate::lock::{self, LockGuard, LockOptions};
use crate::process::{local_hostname, LivenessProbe, SystemProbe};
use crate::reaper::{self, DEFAULT_MAX_SESSION_AGE_HOURS};
use crate::storage::StorageConfig;

/// Resource name of the lock bracketing registry mutations.
pub const REGISTRY_LOCK_NAME: &str = "active-sessions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub hostname: String,
    pub pid: u32,
    pub agent: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// The on-disk JSON structure for the registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    sessions: Vec<SessionEntry>,
}

pub struct SessionRegistry {
    storage: StorageConfig,
    hostname: String,
    probe: Box<dyn LivenessProbe>,
    max_age: chrono::Duration,
    mutation_lock: Option<LockOptions>,
}

impl SessionRegistry {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage,
            hostname: local_hostname(),
            probe: Box::new(SystemProbe),
            max_age: chrono::Duration::hours(DEFAULT_MAX_SESSION_AGE_HOURS),
            mutation_lock: Some(LockOptions::default()),
        }
    }

    pub fn from_config(storage: StorageConfig, config: &ScarConfig) -> Self {
        let mut registry = Self::new(storage).with_max_age(config.session_max_age());
        registry.mutation_lock = config
            .lock_registry_mutations
            .then(|| config.lock_options());
        registry
    }

    /// Overrides the hostname treated as local (for liveness probing and recovery).
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_probe(mut self, probe: impl LivenessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Disables advisory locking around mutations (last whole-document write wins).
    pub fn without_mutation_lock(mut self) -> Self {
        self.mutation_lock = None;
        self
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn path(&self) -> PathBuf {
        self.storage.registry_file()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    /// Current snapshot of the registry. Never fails.
    pub fn list(&self) -> Vec<SessionEntry> {
        read_document(&self.path()).sessions
    }

    pub fn find_by_id(&self, session_id: &str) -> Option<SessionEntry> {
        self.list()
            .into_iter()
            .find(|entry| entry.session_id == session_id)
    }

    pub fn find_by_host_and_pid(&self, hostname: &str, pid: u32) -> Option<SessionEntry> {
        self.list()
            .into_iter()
            .find(|entry| entry.hostname == hostname && entry.pid == pid)
    }

    /// The most recently started session on `hostname`.
    pub fn most_recent_on_host(&self, hostname: &str) -> Option<SessionEntry> {
        self.list()
            .into_iter()
            .filter(|entry| entry.hostname == hostname)
            .max_by_key(|entry| entry.started_at)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Upserts `entry`: any entry with the same session id is replaced.
    pub fn register(&self, entry: SessionEntry) -> Result<()> {
        tracing::debug!(
            session_id = %entry.session_id,
            pid = entry.pid,
            hostname = %entry.hostname,
            "Registering session"
        );
        self.mutate(|sessions| {
            sessions.retain(|existing| existing.session_id != entry.session_id);
            sessions.push(entry);
            ((), true)
        })
    }

    /// Removes the entry if present. Only writes when something changed.
    pub fn unregister(&self, session_id: &str) -> Result<bool> {
        let found = self.mutate(|sessions| {
            let before = sessions.len();
            sessions.retain(|existing| existing.session_id != session_id);
            let found = sessions.len() != before;
            (found, found)
        })?;
        tracing::debug!(session_id = %session_id, found, "Unregistered session");
        Ok(found)
    }

    /// Unregisters a finished session and deletes its per-session storage.
    /// Storage is deleted even when no entry was found.
    pub fn retire(&self, session_id: &str) -> Result<bool> {
        let found = self.unregister(session_id)?;
        remove_session_storage(&self.storage, session_id);
        Ok(found)
    }

    /// Drops expired entries and entries whose local process is gone, deleting
    /// their per-session storage. Returns the number dropped.
    pub fn prune_stale(&self) -> Result<usize> {
        let now = Utc::now();
        let dropped = self.mutate(|sessions| {
            let mut dropped = Vec::new();
            sessions.retain(|entry| {
                let verdict =
                    reaper::assess(entry, now, self.max_age, &self.hostname, self.probe.as_ref());
                if verdict.is_stale() {
                    tracing::debug!(
                        session_id = %entry.session_id,
                        pid = entry.pid,
                        hostname = %entry.hostname,
                        verdict = ?verdict,
                        "Pruning stale session"
                    );
                    dropped.push(entry.session_id.clone());
                }
                !verdict.is_stale()
            });
            let changed = !dropped.is_empty();
            (dropped, changed)
        })?;

        for session_id in &dropped {
            remove_session_storage(&self.storage, session_id);
        }
        Ok(dropped.len())
    }

    /// Read-modify-write cycle. `f` returns its result plus whether to persist.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<SessionEntry>) -> (T, bool)) -> Result<T> {
        let _guard = self.lock_for_mutation();
        let path = self.path();
        let mut document = read_document(&path);
        let (result, changed) = f(&mut document.sessions);
        if changed {
            write_document(&path, &document)?;
        }
        Ok(result)
    }

    fn lock_for_mutation(&self) -> Option<LockGuard> {
        let options = self.mutation_lock.as_ref()?;
        let lock_path = self.storage.lock_file(REGISTRY_LOCK_NAME);
        match lock::acquire(&lock_path, options) {
            Ok(guard) => Some(guard),
            Err(err) => {
                tracing::warn!(error = %err, "Registry lock unavailable; mutating unlocked");
                None
            }
        }
    }
}

fn read_document(path: &Path) -> RegistryFile {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return RegistryFile::default(),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read session registry, treating as empty");
            return RegistryFile::default();
        }
    };

    if content.trim().is_empty() {
        tracing::warn!(path = %path.display(), "Empty session registry, treating as empty");
        return RegistryFile::default();
    }

    match serde_json::from_str::<RegistryFile>(&content) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Corrupt session registry, treating as empty"
            );
            RegistryFile::default()
        }
    }
}

fn write_document(path: &Path, document: &RegistryFile) -> Result<()> {
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| ScarError::json("serialize session registry", e))?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ScarError::io("create registry dir", e))?;

    match write_atomic(parent, path, content.as_bytes()) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Atomic registry write failed, overwriting in place"
            );
            fs::write(path, content).map_err(|e| ScarError::io("write session registry", e))
        }
    }
}

/// Temp file + rename within `dir`, so readers never see a partial document.
pub(crate) fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn remove_session_storage(storage: &StorageConfig, session_id: &str) {
    let dir = match storage.session_dir(session_id) {
        Ok(dir) => dir,
        Err(err) => {
            tracing::warn!(error = %err, "Skipping storage cleanup for unsafe session id");
            return;
        }
    };
    match fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(
                session_id = %session_id,
                error = %err,
                "Failed to delete session storage"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;
    use tempfile::tempdir;

    const HOST: &str = "host-h";

    /// PIDs in the set are alive; everything else is gone.
    struct SetProbe(HashSet<u32>);

    impl LivenessProbe for SetProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn registry(root: &Path) -> SessionRegistry {
        SessionRegistry::new(StorageConfig::with_root(root.to_path_buf()))
            .with_hostname(HOST)
            .with_probe(SetProbe([100].into_iter().collect()))
    }

    fn entry(id: &str, pid: u32, host: &str, age: Duration) -> SessionEntry {
        SessionEntry {
            session_id: id.to_string(),
            hostname: host.to_string(),
            pid,
            agent: "cli".to_string(),
            started_at: Utc::now() - age,
            project: Some("api".to_string()),
        }
    }

    #[test]
    fn test_list_on_missing_file_is_empty() {
        let temp = tempdir().unwrap();
        assert!(registry(temp.path()).list().is_empty());
    }

    #[test]
    fn test_register_round_trips_all_fields() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        let original = entry("a", 100, HOST, Duration::minutes(5));

        reg.register(original.clone()).unwrap();

        assert_eq!(reg.list(), vec![original.clone()]);
        assert_eq!(reg.find_by_id("a"), Some(original));
    }

    #[test]
    fn test_register_without_project_round_trips() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        let mut original = entry("a", 100, HOST, Duration::minutes(5));
        original.project = None;

        reg.register(original.clone()).unwrap();
        assert_eq!(reg.find_by_id("a"), Some(original));
    }

    #[test]
    fn test_register_same_id_replaces() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("a", 100, HOST, Duration::minutes(5))).unwrap();
        reg.register(entry("b", 101, HOST, Duration::minutes(5))).unwrap();

        let mut replacement = entry("a", 200, "host-x", Duration::minutes(1));
        replacement.agent = "desktop".to_string();
        reg.register(replacement.clone()).unwrap();

        let sessions = reg.list();
        assert_eq!(sessions.len(), 2);
        assert_eq!(
            sessions.iter().filter(|s| s.session_id == "a").count(),
            1
        );
        assert_eq!(reg.find_by_id("a"), Some(replacement));
    }

    #[test]
    fn test_unregister_reports_found() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("a", 100, HOST, Duration::minutes(5))).unwrap();

        assert!(reg.unregister("a").unwrap());
        assert!(!reg.unregister("a").unwrap());
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_unregister_missing_does_not_create_file() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        assert!(!reg.unregister("ghost").unwrap());
        assert!(!reg.path().exists());
    }

    #[test]
    fn test_retire_removes_entry_and_storage() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("done", 100, HOST, Duration::minutes(1))).unwrap();
        let dir = reg.storage().session_dir("done").unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("session.json"), "{}").unwrap();

        assert!(reg.retire("done").unwrap());
        assert!(reg.find_by_id("done").is_none());
        assert!(!dir.exists());

        // Unknown ids are fine, and leftover storage still goes.
        std::fs::create_dir_all(&dir).unwrap();
        assert!(!reg.retire("done").unwrap());
        assert!(!dir.exists());
    }

    #[test]
    fn test_find_by_host_and_pid() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("a", 100, HOST, Duration::minutes(5))).unwrap();
        reg.register(entry("b", 100, "host-x", Duration::minutes(5))).unwrap();

        assert_eq!(reg.find_by_host_and_pid("host-x", 100).unwrap().session_id, "b");
        assert_eq!(reg.find_by_host_and_pid(HOST, 100).unwrap().session_id, "a");
        assert!(reg.find_by_host_and_pid(HOST, 101).is_none());
    }

    #[test]
    fn test_most_recent_on_host() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("old", 100, HOST, Duration::hours(2))).unwrap();
        reg.register(entry("new", 101, HOST, Duration::minutes(1))).unwrap();
        reg.register(entry("remote", 102, "host-x", Duration::seconds(1))).unwrap();

        assert_eq!(reg.most_recent_on_host(HOST).unwrap().session_id, "new");
        assert!(reg.most_recent_on_host("host-y").is_none());
    }

    #[test]
    fn test_corrupt_file_reads_empty_and_recovers_on_write() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        std::fs::write(reg.path(), "{\"sessions\": [ garbage").unwrap();

        assert!(reg.list().is_empty());

        reg.register(entry("a", 100, HOST, Duration::minutes(5))).unwrap();
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn test_schema_invalid_file_reads_empty() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        std::fs::write(reg.path(), r#"{"sessions": [{"session_id": 5}]}"#).unwrap();
        assert!(reg.list().is_empty());

        std::fs::write(reg.path(), r#"["not", "an", "object"]"#).unwrap();
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_empty_file_reads_empty() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        std::fs::write(reg.path(), "   \n").unwrap();
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path()).without_mutation_lock();
        reg.register(entry("a", 100, HOST, Duration::minutes(5))).unwrap();
        reg.register(entry("b", 100, HOST, Duration::minutes(5))).unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["active-sessions.json".to_string()]);
    }

    #[test]
    fn test_mutation_lock_is_released() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("a", 100, HOST, Duration::minutes(5))).unwrap();
        assert!(!reg.storage().lock_file(REGISTRY_LOCK_NAME).exists());
    }

    #[test]
    fn test_prune_dead_local_process_keeps_live_one() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("session-a", 100, HOST, Duration::hours(2))).unwrap();
        reg.register(entry("session-b", 999_999, HOST, Duration::hours(1))).unwrap();

        assert_eq!(reg.prune_stale().unwrap(), 1);

        let remaining: Vec<_> = reg.list().into_iter().map(|s| s.session_id).collect();
        assert_eq!(remaining, vec!["session-a".to_string()]);
    }

    #[test]
    fn test_prune_expired_even_if_alive() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("ancient", 100, HOST, Duration::hours(25))).unwrap();

        assert_eq!(reg.prune_stale().unwrap(), 1);
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_prune_keeps_recent_remote_entries() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("remote", 999_999, "host-x", Duration::hours(23))).unwrap();
        reg.register(entry("remote-old", 999_999, "host-x", Duration::hours(48))).unwrap();

        assert_eq!(reg.prune_stale().unwrap(), 1);
        assert_eq!(reg.list().len(), 1);
        assert!(reg.find_by_id("remote").is_some());
    }

    #[test]
    fn test_prune_deletes_session_storage() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("dead", 999_999, HOST, Duration::hours(1))).unwrap();
        reg.register(entry("live", 100, HOST, Duration::hours(1))).unwrap();

        let storage = reg.storage().clone();
        let dead_dir = storage.session_dir("dead").unwrap();
        let live_dir = storage.session_dir("live").unwrap();
        std::fs::create_dir_all(&dead_dir).unwrap();
        std::fs::write(dead_dir.join("session.json"), "{}").unwrap();
        std::fs::create_dir_all(&live_dir).unwrap();

        reg.prune_stale().unwrap();

        assert!(!dead_dir.exists());
        assert!(live_dir.exists());
    }

    #[test]
    fn test_prune_nothing_stale_does_not_write() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        assert_eq!(reg.prune_stale().unwrap(), 0);
        assert!(!reg.path().exists());
    }

    #[test]
    fn test_prune_is_idempotent() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        reg.register(entry("dead", 999_999, HOST, Duration::hours(1))).unwrap();

        assert_eq!(reg.prune_stale().unwrap(), 1);
        assert_eq!(reg.prune_stale().unwrap(), 0);
    }

    #[test]
    fn test_from_config_respects_lock_toggle() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let config = ScarConfig {
            lock_registry_mutations: false,
            ..ScarConfig::default()
        };
        let reg = SessionRegistry::from_config(storage, &config);
        assert!(reg.mutation_lock.is_none());
    }
}
