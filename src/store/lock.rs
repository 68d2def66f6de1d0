// ABOUTME: Workload lock preventing concurrent rollouts of one workload across processes.
// ABOUTME: Uses atomic create-new of a lock file holding the holder's host, pid and start time.
// ABOUTME: A running holder refreshes the file so long rollouts never look abandoned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::attempts::write_atomic;
use super::error::{
    CreateDirSnafu, EncodeSnafu, LockedSnafu, RemoveSnafu, StoreError, WriteSnafu,
};
use crate::types::WorkloadKey;

/// How often a running holder rewrites its lock. Well inside the stale age.
pub const REFRESH_EVERY: Duration = Duration::from_secs(10 * 60);

/// Information about who holds a workload lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Workload being rolled out.
    pub workload: String,
    /// Last time the holder proved it was still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    pub fn new(workload: &WorkloadKey) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            workload: workload.to_string(),
            refreshed_at: None,
        }
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.refreshed_at.unwrap_or(self.started_at)
    }

    /// Locks not refreshed for an hour are assumed abandoned.
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.last_seen();
        age.num_hours() >= 1
    }

    fn same_holder(&self, other: &LockInfo) -> bool {
        self.holder == other.holder && self.pid == other.pid && self.started_at == other.started_at
    }
}

/// A held workload lock that releases on drop.
#[derive(Debug)]
pub struct WorkloadLock {
    path: PathBuf,
    workload: WorkloadKey,
    info: LockInfo,
    released: bool,
}

impl WorkloadLock {
    /// Acquire the lock file at `path`.
    ///
    /// Fails with `StoreError::Locked` if another process holds a fresh lock.
    /// Stale (>1 hour), corrupted or forced locks are broken with a warning.
    pub(crate) fn acquire(path: PathBuf, workload: &WorkloadKey, force: bool) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
        }

        let info = LockInfo::new(workload);
        let json = serde_json::to_string(&info).context(EncodeSnafu)?;

        if try_create(&path, &json)? {
            return Ok(Self {
                path,
                workload: workload.clone(),
                info,
                released: false,
            });
        }

        if !should_break(&path, force)? {
            let existing = read_info(&path);
            return match existing {
                Some(existing) => LockedSnafu {
                    workload: workload.to_string(),
                    holder: existing.holder,
                    pid: existing.pid,
                    started_at: existing.started_at,
                }
                .fail(),
                None => LockedSnafu {
                    workload: workload.to_string(),
                    holder: "unknown".to_string(),
                    pid: 0u32,
                    started_at: Utc::now(),
                }
                .fail(),
            };
        }

        tracing::debug!(path = %path.display(), "removing stale or forced lock");
        let _ = std::fs::remove_file(&path);

        if try_create(&path, &json)? {
            Ok(Self {
                path,
                workload: workload.clone(),
                info,
                released: false,
            })
        } else {
            let existing = read_info(&path);
            LockedSnafu {
                workload: workload.to_string(),
                holder: existing
                    .as_ref()
                    .map(|i| i.holder.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                pid: existing.as_ref().map(|i| i.pid).unwrap_or(0),
                started_at: existing.map(|i| i.started_at).unwrap_or_else(Utc::now),
            }
            .fail()
        }
    }

    pub fn workload(&self) -> &WorkloadKey {
        &self.workload
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the lock as still in use.
    ///
    /// Fails with `StoreError::Locked` when the file no longer names this
    /// holder, i.e. another process broke the lock and took it over.
    pub fn refresh(&self) -> Result<(), StoreError> {
        match read_info(&self.path) {
            Some(current) if current.same_holder(&self.info) => {
                let refreshed = LockInfo {
                    refreshed_at: Some(Utc::now()),
                    ..current
                };
                let json = serde_json::to_vec(&refreshed).context(EncodeSnafu)?;
                write_atomic(&self.path, &json)
            }
            current => LockedSnafu {
                workload: self.workload.to_string(),
                holder: current
                    .as_ref()
                    .map(|i| i.holder.clone())
                    .unwrap_or_else(|| "nobody".to_string()),
                pid: current.as_ref().map(|i| i.pid).unwrap_or(0),
                started_at: current.map(|i| i.started_at).unwrap_or_else(Utc::now),
            }
            .fail(),
        }
    }

    /// Release the lock now, reporting a failure instead of logging it.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(RemoveSnafu { path: &self.path }),
        }
    }
}

impl Drop for WorkloadLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release workload lock");
        }
    }
}

/// Atomically create the lock file. `Ok(false)` when it already exists.
fn try_create(path: &Path, json: &str) -> Result<bool, StoreError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(json.as_bytes())
                .context(WriteSnafu { path })?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).context(WriteSnafu { path }),
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Whether an existing lock may be broken (stale, forced, or unreadable).
fn should_break(path: &Path, force: bool) -> Result<bool, StoreError> {
    match read_info(path) {
        Some(existing) if force => {
            tracing::warn!(
                "Breaking lock held by {} (pid {}) since {}",
                existing.holder,
                existing.pid,
                existing.started_at
            );
            Ok(true)
        }
        Some(existing) if existing.is_stale() => {
            tracing::warn!(
                "Auto-breaking stale lock held by {} (pid {}) since {}",
                existing.holder,
                existing.pid,
                existing.started_at
            );
            Ok(true)
        }
        Some(_) => Ok(false),
        None if !path.exists() => Ok(true),
        None => {
            tracing::warn!("Lock info corrupted, breaking lock");
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Namespace, WorkloadName};

    fn key() -> WorkloadKey {
        WorkloadKey::new(Namespace::default(), WorkloadName::new("web").unwrap())
    }

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let info = LockInfo::new(&key());
        assert_eq!(info.workload, "default/web");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new(&key());
        assert!(!info.is_stale());
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale());
    }

    #[test]
    fn refreshed_lock_is_not_stale() {
        let mut info = LockInfo::new(&key());
        info.started_at = Utc::now() - chrono::Duration::hours(3);
        info.refreshed_at = Some(Utc::now() - chrono::Duration::minutes(10));
        assert!(!info.is_stale());
    }

    #[test]
    fn refresh_keeps_a_long_running_holder_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.web.lock");
        let mut lock = WorkloadLock::acquire(path.clone(), &key(), false).unwrap();

        // Age the lock as if the rollout had been running for hours.
        lock.info.started_at = Utc::now() - chrono::Duration::hours(2);
        std::fs::write(&path, serde_json::to_string(&lock.info).unwrap()).unwrap();
        assert!(read_info(&path).unwrap().is_stale());

        lock.refresh().unwrap();
        let refreshed = read_info(&path).unwrap();
        assert!(refreshed.refreshed_at.is_some());
        assert!(!refreshed.is_stale());

        let err = WorkloadLock::acquire(path, &key(), false).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
    }

    #[test]
    fn refresh_fails_once_the_lock_was_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.web.lock");
        let first = WorkloadLock::acquire(path.clone(), &key(), false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = WorkloadLock::acquire(path.clone(), &key(), true).unwrap();

        assert!(matches!(first.refresh(), Err(StoreError::Locked { .. })));
        assert!(second.refresh().is_ok());
    }

    #[test]
    fn second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks/default.web.lock");

        let lock = WorkloadLock::acquire(path.clone(), &key(), false).unwrap();
        let err = WorkloadLock::acquire(path.clone(), &key(), false).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));

        lock.release().unwrap();
        assert!(!path.exists());
        assert!(WorkloadLock::acquire(path, &key(), false).is_ok());
    }

    #[test]
    fn force_breaks_a_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.web.lock");
        let _held = WorkloadLock::acquire(path.clone(), &key(), false).unwrap();
        assert!(WorkloadLock::acquire(path, &key(), true).is_ok());
    }

    #[test]
    fn stale_and_corrupt_locks_are_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.web.lock");

        let mut stale = LockInfo::new(&key());
        stale.started_at = Utc::now() - chrono::Duration::hours(3);
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        let lock = WorkloadLock::acquire(path.clone(), &key(), false).unwrap();
        drop(lock);

        std::fs::write(&path, "not json").unwrap();
        assert!(WorkloadLock::acquire(path, &key(), false).is_ok());
    }
}
