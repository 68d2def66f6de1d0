// ABOUTME: Library root for ferry - a rollout coordinator for container workloads.
// ABOUTME: The CLI binary in main.rs is a thin layer over the coordinator.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod resolver;
pub mod rollout;
pub mod store;
pub mod types;
