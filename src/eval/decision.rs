use serde::Serialize;

use crate::scan::Violation;

/// Title of a rejection caused by violations.
pub const VIOLATION_TITLE: &str = "Debug Configuration Violation";
/// Title of a rejection caused by a failed check under a fail-closed policy.
pub const FAULT_TITLE: &str = "Debug Configuration Check Failed";

const REQUIRED_ACTIONS: &[&str] = &[
    "Change debug=True to debug=False",
    "Set DEBUG = False in settings",
    "Remove debug flags from production configs",
    "Ensure all configurations are production-ready",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
        }
    }
}

/// What the host is told about one merge attempt.
///
/// For an accepted merge `title` is empty and `message` says why it passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub title: String,
    pub message: String,
}

impl Decision {
    pub fn accepted(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Accepted,
            title: String::new(),
            message: reason.into(),
        }
    }

    pub fn rejected(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Rejected,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Rejection listing every violation, then the remediation checklist.
    pub fn from_violations(violations: &[Violation]) -> Self {
        Self::rejected(VIOLATION_TITLE, violation_report(violations))
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == Outcome::Accepted
    }
}

/// Deterministic report text for a non-empty violation list.
pub fn violation_report(violations: &[Violation]) -> String {
    let mut out = String::new();
    out.push_str("MERGE BLOCKED - Debug Configuration Detected\n\n");
    out.push_str("Debug mode is enabled in configuration files.\n");
    out.push_str("Production code must not contain debug settings.\n\n");
    out.push_str(&format!("Found {} violation(s):\n\n", violations.len()));
    for (i, v) in violations.iter().enumerate() {
        out.push_str(&format!("{}. File: {}\n", i + 1, v.file_path));
        out.push_str(&format!("   Line {}: {}\n\n", v.line_number, v.line_text));
    }
    out.push_str("Required Actions:\n");
    for (i, action) in REQUIRED_ACTIONS.iter().enumerate() {
        out.push_str(&format!("{}. {action}\n", i + 1));
    }
    out
}
