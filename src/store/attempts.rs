// ABOUTME: File-backed persistence for in-flight rollout checkpoints and cancellation markers.
// ABOUTME: Writes go through a temp file and a rename so readers never see a torn checkpoint.

use snafu::ResultExt;
use std::path::{Path, PathBuf};

use super::audit::JsonlAuditLog;
use super::error::{
    CreateDirSnafu, DecodeSnafu, EncodeSnafu, ReadSnafu, RemoveSnafu, StoreError, WriteSnafu,
};
use super::lock::WorkloadLock;
use crate::rollout::Checkpoint;
use crate::types::{AttemptId, WorkloadKey};

const ATTEMPTS_DIR: &str = "attempts";
const LOCKS_DIR: &str = "locks";
const CANCEL_DIR: &str = "cancel";
const AUDIT_FILE: &str = "audit.jsonl";

/// State directory layout:
///
/// ```text
/// <root>/attempts/<namespace>.<name>.json   current checkpoint per workload
/// <root>/locks/<namespace>.<name>.lock      held while a rollout runs
/// <root>/cancel/<attempt-id>                cancellation request marker
/// <root>/audit.jsonl                        append-only sealed attempts
/// ```
#[derive(Debug, Clone)]
pub struct AttemptStore {
    root: PathBuf,
}

impl AttemptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_path(&self, key: &WorkloadKey) -> PathBuf {
        self.root
            .join(ATTEMPTS_DIR)
            .join(format!("{}.json", key.file_stem()))
    }

    fn cancel_path(&self, attempt: &AttemptId) -> PathBuf {
        self.root.join(CANCEL_DIR).join(attempt.as_str())
    }

    /// Persist `checkpoint`, replacing any earlier one for the same workload.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let path = self.checkpoint_path(checkpoint.key());
        let json = serde_json::to_vec_pretty(checkpoint).context(EncodeSnafu)?;
        write_atomic(&path, &json)
    }

    pub fn load(&self, key: &WorkloadKey) -> Result<Option<Checkpoint>, StoreError> {
        read_checkpoint(&self.checkpoint_path(key))
    }

    /// Drop the checkpoint once its attempt is finished.
    pub fn clear(&self, key: &WorkloadKey) -> Result<(), StoreError> {
        remove_if_present(&self.checkpoint_path(key))
    }

    /// Every stored checkpoint, ordered by workload.
    pub fn list(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let dir = self.root.join(ATTEMPTS_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(ReadSnafu { path: dir }),
        };

        let mut checkpoints = Vec::new();
        for entry in entries {
            let path = entry.context(ReadSnafu { path: dir.clone() })?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(checkpoint) = read_checkpoint(&path)?
            {
                checkpoints.push(checkpoint);
            }
        }
        checkpoints.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        Ok(checkpoints)
    }

    /// Take the cross-process lock for `key`.
    pub fn lock(&self, key: &WorkloadKey, force: bool) -> Result<WorkloadLock, StoreError> {
        let path = self
            .root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", key.file_stem()));
        WorkloadLock::acquire(path, key, force)
    }

    /// Ask whichever process drives `attempt` to stop at its next poll.
    pub fn request_cancel(&self, attempt: &AttemptId) -> Result<(), StoreError> {
        write_atomic(&self.cancel_path(attempt), attempt.as_str().as_bytes())
    }

    pub fn cancel_requested(&self, attempt: &AttemptId) -> bool {
        self.cancel_path(attempt).exists()
    }

    pub fn clear_cancel(&self, attempt: &AttemptId) -> Result<(), StoreError> {
        remove_if_present(&self.cancel_path(attempt))
    }

    pub fn audit_log(&self) -> JsonlAuditLog {
        JsonlAuditLog::new(self.root.join(AUDIT_FILE))
    }
}

fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(ReadSnafu { path }),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .context(DecodeSnafu { path })
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).context(WriteSnafu { path: &tmp })?;
    std::fs::rename(&tmp, path).context(WriteSnafu { path })
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(RemoveSnafu { path }),
    }
}
