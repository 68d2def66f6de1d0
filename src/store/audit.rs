// ABOUTME: Append-only audit sink for sealed rollout attempts.
// ABOUTME: JSON-lines file implementation, an in-memory one for tests, and retrying delivery.

use async_trait::async_trait;
use parking_lot::Mutex;
use snafu::ResultExt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{CreateDirSnafu, DecodeSnafu, EncodeSnafu, ReadSnafu, StoreError, WriteSnafu};
use crate::rollout::{RolloutAttempt, SealedAttempt};

/// Where sealed attempts go once they reach a terminal phase.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &SealedAttempt) -> Result<(), StoreError>;
}

/// Append `record`, retrying failures with doubling backoff.
///
/// At-least-once: a retry after a write that actually landed duplicates
/// the line. Readers deduplicate by attempt id.
pub async fn deliver(
    sink: &dyn AuditSink,
    record: &SealedAttempt,
    retries: u32,
    backoff: Duration,
) -> Result<(), StoreError> {
    let mut delay = backoff;
    let mut tries = 0;
    loop {
        match sink.append(record).await {
            Ok(()) => return Ok(()),
            Err(e) if tries < retries => {
                tries += 1;
                tracing::warn!(attempt = %record.id(), try_number = tries, error = %e, "audit append failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// One JSON object per line, in append order.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the log, oldest first, with duplicates from
    /// redelivery removed.
    pub fn read_all(&self) -> Result<Vec<RolloutAttempt>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(ReadSnafu { path: &self.path }),
        };

        let mut records: Vec<RolloutAttempt> = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: RolloutAttempt =
                serde_json::from_str(line).context(DecodeSnafu { path: &self.path })?;
            if !records.iter().any(|r| r.id() == record.id()) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn append(&self, record: &SealedAttempt) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record).context(EncodeSnafu)?;
        line.push(b'\n');

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(WriteSnafu { path: &self.path })?;
        file.write_all(&line)
            .context(WriteSnafu { path: &self.path })?;
        tracing::debug!(attempt = %record.id(), path = %self.path.display(), "audited");
        Ok(())
    }
}

/// In-memory sink. `fail_next` makes the following appends error out.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<SealedAttempt>>,
    failures: Mutex<u32>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    pub fn records(&self) -> Vec<SealedAttempt> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, record: &SealedAttempt) -> Result<(), StoreError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Write {
                    path: PathBuf::from("memory"),
                    source: std::io::Error::other("injected audit failure"),
                });
            }
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::{AttemptPhase, RolloutAttempt};
    use crate::types::{ImageRef, Namespace, WorkloadKey, WorkloadName};

    fn sealed() -> SealedAttempt {
        let mut attempt = RolloutAttempt::new(
            WorkloadKey::new(Namespace::default(), WorkloadName::new("web").unwrap()),
            ImageRef::parse("web:v2").unwrap(),
            Some(ImageRef::parse("web:v1").unwrap()),
            None,
        );
        attempt.enter(AttemptPhase::Succeeded, None);
        attempt.seal()
    }

    #[tokio::test]
    async fn jsonl_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("state/audit.jsonl"));
        let first = sealed();
        let second = sealed();

        log.append(&first).await.unwrap();
        log.append(&second).await.unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        let records = log.read_all().unwrap();
        assert_eq!(records[0].id(), first.id());
        assert_eq!(records[1].id(), second.id());
    }

    #[tokio::test]
    async fn read_all_drops_redelivered_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("audit.jsonl"));
        let record = sealed();
        log.append(&record).await.unwrap();
        log.append(&record).await.unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("audit.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_retries_until_append_succeeds() {
        let sink = MemoryAuditLog::new();
        sink.fail_next(2);
        deliver(&sink, &sealed(), 3, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_gives_up_after_retries() {
        let sink = MemoryAuditLog::new();
        sink.fail_next(5);
        assert!(
            deliver(&sink, &sealed(), 2, Duration::from_millis(100))
                .await
                .is_err()
        );
        assert!(sink.records().is_empty());
    }
}
