// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Enforces a non-empty, duplicate-free workload list.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashSet;

use super::WorkloadConfig;

pub fn deserialize_workloads<'de, D>(deserializer: D) -> Result<NonEmpty<WorkloadConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<WorkloadConfig> = Vec::deserialize(deserializer)?;

    let mut seen = HashSet::new();
    for workload in &values {
        if !seen.insert(workload.key()) {
            return Err(serde::de::Error::custom(format!(
                "duplicate workload: {}",
                workload.key()
            )));
        }
    }

    NonEmpty::from_vec(values)
        .ok_or_else(|| serde::de::Error::custom("at least one workload is required"))
}
