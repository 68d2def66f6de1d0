// ABOUTME: Local persistence: attempt checkpoints, workload locks and the audit log.
// ABOUTME: Everything lives under the configured state directory.

mod attempts;
mod audit;
mod error;
mod lock;

pub use attempts::AttemptStore;
pub use audit::{AuditSink, JsonlAuditLog, MemoryAuditLog, deliver};
pub use error::{StoreError, StoreErrorKind};
pub use lock::{LockInfo, REFRESH_EVERY, WorkloadLock};
