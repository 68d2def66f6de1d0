// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON-lines output modes.

use serde::Serialize;
use std::time::Instant;

use crate::rollout::{Outcome, RolloutAttempt};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit("success", message),
        }
    }

    /// Print a line of requested information (status, history).
    pub fn info(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit("info", message),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit("warning", message),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print the terminal report of a rollout: one line per attempt, plus
    /// the step log in normal mode.
    pub fn outcome(&self, outcome: &Outcome) {
        for attempt in outcome.records() {
            match self.mode {
                OutputMode::Normal => {
                    println!("{}", summary(attempt));
                    for step in attempt.steps() {
                        println!(
                            "    #{}.{} {} -> {}",
                            step.sequence,
                            step.try_number,
                            step.step,
                            outcome_label(&step.outcome)
                        );
                    }
                }
                OutputMode::Quiet => println!("{}", summary(attempt)),
                OutputMode::Json => {
                    let event = AttemptEvent {
                        event: "attempt",
                        attempt,
                    };
                    if let Ok(json) = serde_json::to_string(&event) {
                        println!("{json}");
                    }
                }
            }
        }
    }

    /// Print one attempt record (history, status).
    pub fn attempt(&self, attempt: &RolloutAttempt) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => println!("{}", summary(attempt)),
            OutputMode::Json => {
                let event = AttemptEvent {
                    event: "attempt",
                    attempt,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }

    fn emit(&self, event: &str, message: &str) {
        let event = JsonEvent {
            event,
            message,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            println!("{json}");
        }
    }
}

fn summary(attempt: &RolloutAttempt) -> String {
    let kind = if attempt.is_rollback() {
        "rollback"
    } else {
        "attempt"
    };
    let mut line = format!(
        "{} {} {} {} -> {}",
        kind,
        attempt.id().short(),
        attempt.workload(),
        attempt.target(),
        attempt.phase()
    );
    if let Some(reason) = attempt.reason() {
        line.push_str(&format!(" ({reason})"));
    }
    line
}

fn outcome_label(outcome: &crate::rollout::StepOutcome) -> String {
    use crate::rollout::StepOutcome;
    match outcome {
        StepOutcome::Accepted => "accepted".to_string(),
        StepOutcome::Rejected { reason } => format!("rejected: {reason}"),
        StepOutcome::TimedOut { reason } => format!("timed out: {reason}"),
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct AttemptEvent<'a> {
    event: &'a str,
    attempt: &'a RolloutAttempt,
}
