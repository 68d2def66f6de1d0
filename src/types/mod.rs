// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod build_id;
mod id;
mod image_ref;
mod names;

pub use build_id::{BuildId, BuildIdError};
pub use id::{AttemptId, ReplicaId};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use names::{NameError, Namespace, WorkloadKey, WorkloadName};
