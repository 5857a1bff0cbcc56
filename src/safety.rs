//! Pre-execution denylist check over task text.
//!
//! This is a text match on what the task asks for, not a sandbox: nothing
//! the provider runs afterwards is filtered.

use crate::error::TaskError;
use crate::types::Task;

#[derive(Debug, Clone)]
pub struct SafetyGate {
    /// Lowercased patterns.
    denylist: Vec<String>,
}

/// Outcome of a safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Allowed,
    /// A pattern matched but the task is marked `dangerous_ok`.
    Overridden { pattern: String },
    Blocked { pattern: String },
}

impl SafetyGate {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let denylist = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { denylist }
    }

    /// First denylisted pattern found in `text`, case-insensitively.
    pub fn find_match(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.denylist
            .iter()
            .find(|pattern| haystack.contains(pattern.as_str()))
            .map(String::as_str)
    }

    pub fn check(&self, task: &Task) -> SafetyVerdict {
        match self.find_match(&task.safety_text()) {
            None => SafetyVerdict::Allowed,
            Some(pattern) if task.dangerous_ok => SafetyVerdict::Overridden {
                pattern: pattern.to_string(),
            },
            Some(pattern) => SafetyVerdict::Blocked {
                pattern: pattern.to_string(),
            },
        }
    }
}

impl SafetyVerdict {
    /// The error to record when the task is blocked.
    pub fn violation(&self) -> Option<TaskError> {
        match self {
            SafetyVerdict::Blocked { pattern } => Some(TaskError::safety_violation(pattern)),
            _ => None,
        }
    }
}
