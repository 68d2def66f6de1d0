// ABOUTME: Housekeeping warnings raised while closing out an attempt (audit, checkpoint, lock).
// ABOUTME: They never change the outcome; each is logged and printed beside the report.

use std::fmt;

/// Problems noticed after an attempt reached its terminal phase.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let warning = Warning {
            kind,
            message: message.into(),
        };
        tracing::warn!(kind = %kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A sealed record missed the audit sink. Its checkpoint stays behind
    /// for `resume` to deliver.
    AuditDelivery,
    /// The checkpoint could be neither cleared nor rewritten.
    Checkpoint,
    CancelMarker,
    /// The lock file outlived the attempt.
    LockRelease,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::AuditDelivery => "audit delivery",
            WarningKind::Checkpoint => "checkpoint",
            WarningKind::CancelMarker => "cancel marker",
            WarningKind::LockRelease => "lock release",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
