// ABOUTME: Store error types with SNAFU pattern.
// ABOUTME: Every filesystem failure carries the path it happened on.

use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to remove {}: {source}", path.display()))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("corrupt record in {}: {source}", path.display()))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("failed to encode record: {source}"))]
    Encode { source: serde_json::Error },

    #[snafu(display(
        "workload {workload} is locked by {holder} (pid {pid}) since {started_at}"
    ))]
    Locked {
        workload: String,
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Filesystem access failed.
    Io,
    /// A persisted record could not be encoded or decoded.
    Format,
    /// Another process holds the workload lock.
    Locked,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::CreateDir { .. }
            | StoreError::Write { .. }
            | StoreError::Read { .. }
            | StoreError::Remove { .. } => StoreErrorKind::Io,
            StoreError::Decode { .. } | StoreError::Encode { .. } => StoreErrorKind::Format,
            StoreError::Locked { .. } => StoreErrorKind::Locked,
        }
    }
}
