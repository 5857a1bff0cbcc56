//! Primary/fallback routing.
//!
//! The primary runs first. On failure or rate limiting the fallback runs
//! exactly once with the same request. There is never a third invocation.

use super::{CommandProvider, ProviderClient, ProviderOutcome, ProviderRequest};
use crate::config::ProvidersConfig;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Record of one provider invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub exit_code: Option<i32>,
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// Final routing result. `outcome` is either `Success` or `Failure`.
#[derive(Debug, Clone)]
pub struct RouterOutcome {
    /// Provider whose response is reported.
    pub provider: String,
    pub outcome: ProviderOutcome,
    pub output: String,
    pub attempts: Vec<ProviderAttempt>,
}

impl RouterOutcome {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[derive(Clone)]
pub struct ProviderRouter {
    primary: Arc<dyn ProviderClient>,
    fallback: Option<Arc<dyn ProviderClient>>,
}

impl ProviderRouter {
    pub fn new(primary: Arc<dyn ProviderClient>, fallback: Option<Arc<dyn ProviderClient>>) -> Self {
        Self { primary, fallback }
    }

    /// Build subprocess providers from configuration.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let primary: Arc<dyn ProviderClient> =
            Arc::new(CommandProvider::from_config(&config.primary)?);
        let fallback = match config.fallback {
            Some(ref fallback) => {
                Some(Arc::new(CommandProvider::from_config(fallback)?) as Arc<dyn ProviderClient>)
            }
            None => None,
        };
        Ok(Self::new(primary, fallback))
    }

    pub async fn execute(&self, request: &ProviderRequest) -> RouterOutcome {
        let primary_name = self.primary.name().to_string();
        let first = self.primary.execute(request).await;
        let mut attempts = vec![ProviderAttempt {
            provider: primary_name.clone(),
            exit_code: first.exit_code,
            succeeded: first.outcome.is_success(),
            detail: first.outcome.detail().map(str::to_string),
        }];

        let primary_reason = match first.outcome {
            ProviderOutcome::Success => {
                return RouterOutcome {
                    provider: primary_name,
                    outcome: ProviderOutcome::Success,
                    output: first.raw_output,
                    attempts,
                };
            }
            ProviderOutcome::RateLimited(ref detail) => format!("rate limited ({})", detail),
            ProviderOutcome::Failure(ref detail) => format!("failed ({})", detail),
        };

        let Some(ref fallback) = self.fallback else {
            warn!(provider = %primary_name, "Primary provider {}, no fallback configured", primary_reason);
            return RouterOutcome {
                outcome: ProviderOutcome::Failure(format!(
                    "{} {}; no fallback configured",
                    primary_name, primary_reason
                )),
                provider: primary_name,
                output: first.raw_output,
                attempts,
            };
        };

        let fallback_name = fallback.name().to_string();
        info!(
            primary = %primary_name,
            fallback = %fallback_name,
            "Primary provider {}, trying fallback",
            primary_reason
        );

        let second = fallback.execute(request).await;
        attempts.push(ProviderAttempt {
            provider: fallback_name.clone(),
            exit_code: second.exit_code,
            succeeded: second.outcome.is_success(),
            detail: second.outcome.detail().map(str::to_string),
        });

        let outcome = match second.outcome {
            ProviderOutcome::Success => ProviderOutcome::Success,
            ProviderOutcome::RateLimited(ref detail) | ProviderOutcome::Failure(ref detail) => {
                ProviderOutcome::Failure(format!(
                    "{} {}; fallback {} failed ({})",
                    primary_name, primary_reason, fallback_name, detail
                ))
            }
        };

        RouterOutcome {
            provider: fallback_name,
            outcome,
            output: second.raw_output,
            attempts,
        }
    }
}
