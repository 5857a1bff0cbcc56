//! Subprocess-backed provider.

use super::{ProviderClient, ProviderRequest, ProviderResponse, classify};
use crate::config::{DeliveryMode, ProviderConfig};
use crate::error::TaskError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs an external CLI in the task's repository.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    name: String,
    program: String,
    args: Vec<String>,
    delivery: DeliveryMode,
    prompt_flag: String,
    env: BTreeMap<String, String>,
}

impl CommandProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let (program, args) = config.command.split_first().ok_or_else(|| {
            TaskError::config(format!("Provider '{}' has an empty command", config.name))
        })?;

        Ok(Self {
            name: config.name.clone(),
            program: program.clone(),
            args: args.to_vec(),
            delivery: config.delivery,
            prompt_flag: config.prompt_flag.clone(),
            env: config.env.clone(),
        })
    }

    fn build_command(&self, request: &ProviderRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&request.repo_path)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match self.delivery {
            DeliveryMode::Stdin => {
                cmd.stdin(Stdio::piped());
            }
            DeliveryMode::Argument => {
                cmd.arg(&self.prompt_flag)
                    .arg(&request.prompt)
                    .stdin(Stdio::null());
            }
        }
        cmd
    }
}

#[async_trait]
impl ProviderClient for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &ProviderRequest) -> ProviderResponse {
        debug!(
            provider = %self.name,
            repo = %request.repo_path.display(),
            "Starting provider"
        );

        let mut child = match self.build_command(request).spawn() {
            Ok(child) => child,
            Err(e) => {
                return ProviderResponse::failure(format!(
                    "failed to start '{}': {}",
                    self.program, e
                ));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            let provider = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    warn!(%provider, "Failed to write prompt to stdin: {}", e);
                }
                // Dropping stdin closes the pipe.
            });
        }

        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ProviderResponse::failure(format!("failed to collect output: {}", e));
            }
            Err(_) => {
                return ProviderResponse::failure(format!(
                    "timed out after {}s",
                    request.timeout.as_secs()
                ));
            }
        };

        let mut raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        raw_output.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code();
        let outcome = classify(exit_code, &raw_output);
        debug!(provider = %self.name, ?exit_code, ?outcome, "Provider finished");

        ProviderResponse {
            raw_output,
            exit_code,
            outcome,
        }
    }
}
