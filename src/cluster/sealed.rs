// ABOUTME: Sealed trait pattern for cluster capability traits.
// ABOUTME: Only bindings defined in this crate may implement ClusterOps or RegistryOps.

/// Sealed trait to prevent external implementations.
///
/// New methods can be added to the capability traits without breaking
/// downstream code, because nothing outside this crate implements them.
pub trait Sealed {}
