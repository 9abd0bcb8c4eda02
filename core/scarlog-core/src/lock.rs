//! Advisory locks over named filesystem resources.
//!
//! A lock is a small JSON record at a caller-chosen path. Holding the lock means
//! having created that record; every participant follows the same convention, the
//! OS enforces nothing. Kernel file locks (`flock`, `fcntl`) are avoided because
//! they are unreliable across network and container filesystems.
//!
//! # Record Format
//!
//! ```json
//! { "pid": 4242, "hostname": "devbox", "acquired_at": "2025-01-01T12:00:00Z" }
//! ```
//!
//! # Acquisition
//!
//! 1. Create the record only if absent (temp file + hard link, so the record is
//!    never observed half-written).
//! 2. On conflict, classify the existing record:
//!    - same `(pid, hostname)` as the caller → **reentrant**, succeed immediately
//!    - unreadable/corrupt → abandoned, break it
//!    - older than `stale_after` → holder presumed crashed, break it
//!    - otherwise → sleep `poll_interval` and retry until `timeout`
//! 3. Breaking renames the record to a unique `<name>.<ulid>.broken` sibling and
//!    goes back to step 1. Only one of several breakers can win the rename, and
//!    the create in step 1 never clobbers, so two callers never both hold the
//!    lock.
//!
//! Waiting is a bounded poll loop. File-change notification APIs vary too much
//! across platforms to be worth the complexity here.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, ScarError};
use crate::process::local_hostname;

/// Records older than this are treated as left behind by a crashed holder.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// On-disk lock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(owner: &LockOwner) -> Self {
        Self {
            pid: owner.pid,
            hostname: owner.hostname.clone(),
            acquired_at: Utc::now(),
        }
    }

    /// Age relative to `now`. Negative when the holder's clock runs ahead.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.acquired_at)
    }

    pub fn is_held_by(&self, owner: &LockOwner) -> bool {
        self.pid == owner.pid && self.hostname == owner.hostname
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let age_ms = self.age(now).num_milliseconds();
        age_ms > 0 && age_ms as u128 > stale_after.as_millis()
    }
}

/// Holder identity: the `(pid, hostname)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub hostname: String,
}

impl LockOwner {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: local_hostname(),
        }
    }

    pub fn new(pid: u32, hostname: impl Into<String>) -> Self {
        Self {
            pid,
            hostname: hostname.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Maximum cumulative wait before giving up.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Age after which another holder's record is force-broken.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// How a lock was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// No record existed; we created it.
    Created,
    /// We already held it.
    Reentrant,
    /// An unreadable record was moved aside first.
    BrokeCorrupt,
    /// An expired record was moved aside first.
    BrokeStale,
}

/// Proof of holding a lock. Releases on drop unless the acquisition was reentrant,
/// in which case the outer holder stays responsible for the record.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    path: PathBuf,
    record: LockRecord,
    acquisition: Acquisition,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    pub fn is_reentrant(&self) -> bool {
        self.acquisition == Acquisition::Reentrant
    }

    /// Releases now, reporting I/O failures instead of only logging them.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.release_inner()
    }

    /// Rewrites `acquired_at` to now so a long-running holder is not taken for a
    /// crashed one. Call well within `stale_after`.
    ///
    /// Fails with [`ScarError::LockLost`] if the record on disk is no longer ours.
    /// Reentrant guards leave refreshing to the outer holder.
    pub fn refresh(&mut self) -> Result<()> {
        if self.is_reentrant() {
            return Ok(());
        }
        match read_record(&self.path) {
            RecordRead::Valid(current) if current == self.record => {}
            _ => {
                return Err(ScarError::LockLost {
                    path: self.path.clone(),
                })
            }
        }

        let refreshed = LockRecord {
            acquired_at: Utc::now(),
            ..self.record.clone()
        };
        staged_record(&self.path, &refreshed)?
            .persist(&self.path)
            .map_err(|err| {
                ScarError::io(format!("refresh lock {}", self.path.display()), err.error)
            })?;
        self.record = refreshed;
        Ok(())
    }

    fn release_inner(&self) -> Result<()> {
        if self.is_reentrant() {
            return Ok(());
        }
        // Only delete a record that is still ours. If we were slow enough to be
        // force-broken, the file now belongs to someone else.
        match read_record(&self.path) {
            RecordRead::Valid(current) if current != self.record => {
                tracing::warn!(
                    path = %self.path.display(),
                    holder_pid = current.pid,
                    holder_hostname = %current.hostname,
                    "Lock was taken over before release; leaving it in place"
                );
                Ok(())
            }
            RecordRead::Missing => Ok(()),
            _ => release(&self.path),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.release_inner() {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to release lock");
        }
    }
}

enum RecordRead {
    Missing,
    Corrupt(String),
    Valid(LockRecord),
}

fn read_record(path: &Path) -> RecordRead {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return RecordRead::Missing,
        Err(err) => return RecordRead::Corrupt(err.to_string()),
    };
    match serde_json::from_str(&content) {
        Ok(record) => RecordRead::Valid(record),
        Err(err) => RecordRead::Corrupt(err.to_string()),
    }
}

/// Reads the current lock record, if one exists and parses.
pub fn read_lock_record(path: &Path) -> Option<LockRecord> {
    match read_record(path) {
        RecordRead::Valid(record) => Some(record),
        _ => None,
    }
}

fn staged_record(path: &Path, record: &LockRecord) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ScarError::io("create lock dir", e))?;

    let content =
        serde_json::to_vec(record).map_err(|e| ScarError::json("serialize lock record", e))?;
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|e| ScarError::io("create lock temp file", e))?;
    temp.write_all(&content)
        .map_err(|e| ScarError::io("write lock temp file", e))?;
    temp.flush()
        .map_err(|e| ScarError::io("flush lock temp file", e))?;
    Ok(temp)
}

/// Creates the record only if no record exists. Returns `Ok(false)` on conflict.
fn try_create(path: &Path, record: &LockRecord) -> Result<bool> {
    let temp = staged_record(path, record)?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(ScarError::io(
            format!("create lock {}", path.display()),
            err.error,
        )),
    }
}

fn tombstone_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    path.with_file_name(format!("{name}.{}.broken", ulid::Ulid::new()))
}

/// Moves an abandoned record aside. Returns `Ok(true)` if this caller removed
/// the record `expected` describes, leaving `path` free for [`try_create`].
///
/// Rename is atomic: of several callers breaking the same record, exactly one
/// moves it and the rest see `NotFound`. A caller that moved a record created
/// after its own observation links it back and reports `Ok(false)`.
fn break_record(path: &Path, expected: impl Fn(&RecordRead) -> bool) -> Result<bool> {
    let tombstone = tombstone_path(path);
    match fs::rename(path, &tombstone) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(ScarError::io(format!("break lock {}", path.display()), err)),
    }

    if expected(&read_record(&tombstone)) {
        discard_tombstone(&tombstone);
        return Ok(true);
    }

    // Hard link, so a record created in the meantime is never clobbered.
    match fs::hard_link(&tombstone, path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::warn!(path = %path.display(), "Lock record displaced while breaking");
        }
        Err(err) => {
            return Err(ScarError::io(
                format!("restore lock {} from {}", path.display(), tombstone.display()),
                err,
            ));
        }
    }
    discard_tombstone(&tombstone);
    Ok(false)
}

fn discard_tombstone(tombstone: &Path) {
    if let Err(err) = fs::remove_file(tombstone) {
        tracing::warn!(path = %tombstone.display(), error = %err, "Failed to remove broken lock record");
    }
}

/// Acquires the lock at `path` for the current process.
pub fn acquire(path: &Path, options: &LockOptions) -> Result<LockGuard> {
    acquire_as(path, &LockOwner::current(), options)
}

/// Acquires the lock at `path` on behalf of `owner`.
///
/// Blocks for at most `options.timeout`. On timeout the error carries the holder
/// observed last, for diagnosis.
pub fn acquire_as(path: &Path, owner: &LockOwner, options: &LockOptions) -> Result<LockGuard> {
    let started = Instant::now();
    let mut broke = None;

    loop {
        let record = LockRecord::new(owner);
        let acquisition = broke.take().unwrap_or(Acquisition::Created);
        if try_create(path, &record)? {
            tracing::debug!(path = %path.display(), pid = owner.pid, ?acquisition, "Lock acquired");
            return Ok(guard(path, record, acquisition));
        }

        let holder = match read_record(path) {
            // Released between our create attempt and the read.
            RecordRead::Missing => continue,
            RecordRead::Corrupt(reason) => {
                tracing::warn!(path = %path.display(), reason = %reason, "Breaking corrupt lock");
                if break_record(path, |moved| matches!(moved, RecordRead::Corrupt(_)))? {
                    broke = Some(Acquisition::BrokeCorrupt);
                }
                continue;
            }
            RecordRead::Valid(holder) => holder,
        };

        if holder.is_held_by(owner) {
            tracing::debug!(path = %path.display(), pid = owner.pid, "Lock re-entered");
            return Ok(guard(path, holder, Acquisition::Reentrant));
        }

        let now = Utc::now();
        if holder.is_stale(now, options.stale_after) {
            tracing::warn!(
                path = %path.display(),
                holder_pid = holder.pid,
                holder_hostname = %holder.hostname,
                age_ms = holder.age(now).num_milliseconds(),
                "Breaking stale lock"
            );
            if break_record(path, |moved| matches!(moved, RecordRead::Valid(r) if *r == holder))? {
                broke = Some(Acquisition::BrokeStale);
            }
            continue;
        }

        let waited = started.elapsed();
        if waited >= options.timeout {
            let age_ms = holder.age(now).num_milliseconds();
            return Err(ScarError::LockTimeout {
                path: path.to_path_buf(),
                holder_pid: holder.pid,
                holder_hostname: holder.hostname,
                age_ms,
                waited_ms: waited.as_millis() as u64,
            });
        }

        thread::sleep(options.poll_interval);
    }
}

fn guard(path: &Path, record: LockRecord, acquisition: Acquisition) -> LockGuard {
    LockGuard {
        path: path.to_path_buf(),
        record,
        acquisition,
        released: false,
    }
}

/// Deletes the lock record. Absence is not an error.
pub fn release(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ScarError::io(format!("release lock {}", path.display()), err)),
    }
}

/// Runs `f` while holding the lock at `path`.
///
/// The lock is released on every exit path: normal return, error return, and
/// panic unwinding (via the guard). `f`'s error wins over a release failure.
pub fn with_lock<T, E, F>(path: &Path, options: &LockOptions, f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<ScarError>,
{
    with_lock_as(path, &LockOwner::current(), options, f)
}

pub fn with_lock_as<T, E, F>(
    path: &Path,
    owner: &LockOwner,
    options: &LockOptions,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<ScarError>,
{
    let guard = acquire_as(path, owner, options)?;
    let result = f();
    let released = guard.release();
    match (result, released) {
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err.into()),
        (Ok(value), Ok(())) => Ok(value),
    }
}
