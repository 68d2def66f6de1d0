// ABOUTME: Stall detection: counts polls without forward progress and time since the last progress.
// ABOUTME: Forward progress means more updated or ready-updated replicas, or fewer outdated ones.

use std::time::Duration;
use tokio::time::Instant;

use crate::cluster::ReplicaCounts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallVerdict {
    Progressing,
    Stalled(String),
}

#[derive(Debug, Clone, Copy)]
struct Marks {
    updated: u32,
    updated_ready: u32,
    outdated: u32,
}

#[derive(Debug)]
pub struct StallDetector {
    stall_after_polls: u32,
    readiness_timeout: Duration,
    marks: Option<Marks>,
    idle_polls: u32,
    last_progress: Instant,
}

impl StallDetector {
    pub fn new(stall_after_polls: u32, readiness_timeout: Duration) -> Self {
        Self {
            stall_after_polls,
            readiness_timeout,
            marks: None,
            idle_polls: 0,
            last_progress: Instant::now(),
        }
    }

    /// Record a successful observation.
    pub fn observe(&mut self, counts: &ReplicaCounts) -> StallVerdict {
        let progressed = match &mut self.marks {
            None => {
                self.marks = Some(Marks {
                    updated: counts.updated,
                    updated_ready: counts.updated_ready,
                    outdated: counts.outdated,
                });
                true
            }
            Some(marks) => {
                let mut progressed = false;
                if counts.updated > marks.updated {
                    marks.updated = counts.updated;
                    progressed = true;
                }
                if counts.updated_ready > marks.updated_ready {
                    marks.updated_ready = counts.updated_ready;
                    progressed = true;
                }
                if counts.outdated < marks.outdated {
                    marks.outdated = counts.outdated;
                    progressed = true;
                }
                progressed
            }
        };

        if progressed {
            self.idle_polls = 0;
            self.last_progress = Instant::now();
            return StallVerdict::Progressing;
        }
        self.idle()
    }

    /// Record a poll whose observation failed transiently.
    pub fn observe_failure(&mut self) -> StallVerdict {
        self.idle()
    }

    pub fn idle_polls(&self) -> u32 {
        self.idle_polls
    }

    fn idle(&mut self) -> StallVerdict {
        self.idle_polls += 1;
        if self.idle_polls >= self.stall_after_polls {
            return StallVerdict::Stalled(format!(
                "no forward progress in {} consecutive polls",
                self.idle_polls
            ));
        }
        let waited = self.last_progress.elapsed();
        if waited >= self.readiness_timeout {
            return StallVerdict::Stalled(format!(
                "no forward progress within readiness timeout of {:?}",
                self.readiness_timeout
            ));
        }
        StallVerdict::Progressing
    }
}
