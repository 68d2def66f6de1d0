// ABOUTME: Point-in-time snapshot of a workload's replicas as reported by the cluster.
// ABOUTME: Counts are derived relative to a target image so the same snapshot serves rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{ImageRef, ReplicaId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    pub id: ReplicaId,
    pub image: ImageRef,
    pub ready: bool,
}

/// Observed replica state. Never mutated after construction; observations
/// may be stale by the time they are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaObservation {
    pub observed_at: DateTime<Utc>,
    pub desired: u32,
    replicas: Vec<ReplicaSnapshot>,
}

/// Replica counts relative to one target image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaCounts {
    pub desired: u32,
    pub total: u32,
    pub updated: u32,
    pub updated_ready: u32,
    pub outdated: u32,
    pub outdated_ready: u32,
}

impl ReplicaCounts {
    pub fn ready(&self) -> u32 {
        self.updated_ready + self.outdated_ready
    }

    pub fn outdated_unready(&self) -> u32 {
        self.outdated - self.outdated_ready
    }

    pub fn updated_unready(&self) -> u32 {
        self.updated - self.updated_ready
    }

    /// All desired replicas run the target, none run anything else, all ready.
    pub fn is_converged(&self) -> bool {
        self.updated == self.desired && self.outdated == 0 && self.updated_ready == self.desired
    }
}

impl ReplicaObservation {
    pub fn new(desired: u32, replicas: Vec<ReplicaSnapshot>) -> Self {
        Self {
            observed_at: Utc::now(),
            desired,
            replicas,
        }
    }

    pub fn replicas(&self) -> &[ReplicaSnapshot] {
        &self.replicas
    }

    pub fn current(&self) -> u32 {
        self.replicas.len() as u32
    }

    pub fn ready(&self) -> u32 {
        self.replicas.iter().filter(|r| r.ready).count() as u32
    }

    pub fn updated(&self, target: &ImageRef) -> u32 {
        self.replicas
            .iter()
            .filter(|r| r.image.same_image(target))
            .count() as u32
    }

    pub fn updated_ready(&self, target: &ImageRef) -> u32 {
        self.replicas
            .iter()
            .filter(|r| r.ready && r.image.same_image(target))
            .count() as u32
    }

    pub fn outdated(&self, target: &ImageRef) -> u32 {
        self.current() - self.updated(target)
    }

    pub fn counts(&self, target: &ImageRef) -> ReplicaCounts {
        let mut counts = ReplicaCounts {
            desired: self.desired,
            ..Default::default()
        };
        for replica in &self.replicas {
            counts.total += 1;
            match (replica.image.same_image(target), replica.ready) {
                (true, true) => {
                    counts.updated += 1;
                    counts.updated_ready += 1;
                }
                (true, false) => counts.updated += 1,
                (false, true) => {
                    counts.outdated += 1;
                    counts.outdated_ready += 1;
                }
                (false, false) => counts.outdated += 1,
            }
        }
        counts
    }

    /// The image most replicas run, ignoring `exclude`. Ties go to the image
    /// with more ready replicas, then to the first one seen.
    pub fn dominant_image(&self, exclude: Option<&ImageRef>) -> Option<ImageRef> {
        let mut tally: Vec<(ImageRef, u32, u32)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for replica in &self.replicas {
            if exclude.is_some_and(|e| replica.image.same_image(e)) {
                continue;
            }
            let key = replica.image.to_string();
            let slot = *index.entry(key).or_insert_with(|| {
                tally.push((replica.image.clone(), 0, 0));
                tally.len() - 1
            });
            tally[slot].1 += 1;
            if replica.ready {
                tally[slot].2 += 1;
            }
        }

        let mut best: Option<&(ImageRef, u32, u32)> = None;
        for entry in &tally {
            if best.is_none_or(|b| (entry.1, entry.2) > (b.1, b.2)) {
                best = Some(entry);
            }
        }
        best.map(|(image, _, _)| image.clone())
    }
}
