//! Code-generation backends.
//!
//! A provider takes a compiled prompt and a working directory and returns
//! the raw output together with a classified outcome. Spawn errors and
//! timeouts are reported as failures, never as `Err`, so the router can
//! always decide whether to fall back.

mod command;
mod router;

pub use command::CommandProvider;
pub use router::{ProviderAttempt, ProviderRouter, RouterOutcome};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Output substrings that mark a usage-limit refusal, matched case-insensitively.
pub const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "usage cap",
    "quota",
    "exceeded",
    "too many requests",
];

/// One provider invocation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    pub repo_path: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Success,
    Failure(String),
    RateLimited(String),
}

impl ProviderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Success)
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ProviderOutcome::Success => None,
            ProviderOutcome::Failure(detail) | ProviderOutcome::RateLimited(detail) => {
                Some(detail)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Combined stdout and stderr.
    pub raw_output: String,
    /// `None` when the process never exited normally (spawn error, signal, timeout).
    pub exit_code: Option<i32>,
    pub outcome: ProviderOutcome,
}

impl ProviderResponse {
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            raw_output: String::new(),
            exit_code: None,
            outcome: ProviderOutcome::Failure(detail.into()),
        }
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &ProviderRequest) -> ProviderResponse;
}

/// Classify a finished invocation.
///
/// Rate-limit markers win over the exit code: some backends exit 0 after
/// printing a usage-cap message.
pub fn classify(exit_code: Option<i32>, output: &str) -> ProviderOutcome {
    let lowered = output.to_lowercase();
    if let Some(marker) = RATE_LIMIT_MARKERS.iter().find(|m| lowered.contains(*m)) {
        return ProviderOutcome::RateLimited(format!("output mentions '{}'", marker));
    }

    match exit_code {
        Some(0) => ProviderOutcome::Success,
        Some(code) => ProviderOutcome::Failure(format!("exited with code {}", code)),
        None => ProviderOutcome::Failure("terminated by signal".to_string()),
    }
}
