//! Completion notifications.
//!
//! Delivery is best-effort: a failed notification is logged and never
//! changes the task.

use crate::config::TelegramConfig;
use crate::types::{Task, TaskId, TaskStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Characters of provider output carried in a notification.
pub const SUMMARY_LIMIT: usize = 300;

const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// What a notification reports about a finished task.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionNotice {
    pub task_id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub provider: Option<String>,
    pub worker: Option<String>,
    pub summary: String,
    pub error_detail: Option<String>,
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
}

impl CompletionNotice {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            status: task.status,
            provider: task.assigned_provider.clone(),
            worker: task.worker_id.clone(),
            summary: summarize_output(task.output.as_deref().unwrap_or_default(), SUMMARY_LIMIT),
            error_detail: task.error_detail.clone(),
            branch_name: task.branch_name.clone(),
            commit_hash: task.commit_hash.clone(),
        }
    }

    /// Plain-text message body.
    pub fn message(&self) -> String {
        let mut text = format!(
            "Task {}: {}\nStatus: {}\nProvider: {}\nWorker: {}\n",
            self.task_id,
            self.title,
            self.status,
            self.provider.as_deref().unwrap_or("-"),
            self.worker.as_deref().unwrap_or("-"),
        );
        if !self.summary.is_empty() {
            text.push_str(&format!("Summary: {}\n", self.summary));
        }
        if let Some(ref detail) = self.error_detail {
            text.push_str(&format!("Error: {}\n", detail));
        }
        if let Some(ref branch) = self.branch_name {
            text.push_str(&format!("Branch: {}\n", branch));
        }
        if let Some(ref commit) = self.commit_hash {
            text.push_str(&format!("Commit: {}\n", commit));
        }
        text
    }
}

/// Text after the first `Summary:` marker, else the start of the output,
/// truncated to `limit` characters.
pub fn summarize_output(output: &str, limit: usize) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `output`.
    let lowered = output.to_ascii_lowercase();
    let section = match lowered.find("summary:") {
        Some(index) => output[index + "summary:".len()..].trim(),
        None => output.trim(),
    };
    section.chars().take(limit).collect()
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify_completion(&self, notice: &CompletionNotice) -> Result<(), NotifyError>;
}

/// Send a notification, logging instead of failing.
pub async fn notify_best_effort(notifier: &dyn Notifier, notice: &CompletionNotice) {
    if let Err(e) = notifier.notify_completion(notice).await {
        warn!(
            task_id = notice.task_id,
            notifier = notifier.name(),
            "Notification failed: {}",
            e
        );
    }
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify_completion(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": notice.message(),
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .timeout(TELEGRAM_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Writes notifications to the log. Used when no channel is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify_completion(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        info!(
            task_id = notice.task_id,
            status = %notice.status,
            provider = notice.provider.as_deref().unwrap_or("-"),
            "Task finished: {}",
            notice.title
        );
        Ok(())
    }
}

/// Telegram when credentials are configured, otherwise the log.
pub fn notifier_from_config(config: &TelegramConfig) -> Arc<dyn Notifier> {
    match (config.bot_token.clone(), config.chat_id.clone()) {
        (Some(token), Some(chat)) if config.is_configured() => {
            Arc::new(TelegramNotifier::new(token, chat))
        }
        _ => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_marker_section() {
        let output = "thinking...\nSummary: Fixed the bug.\nFiles changed: a.rs";
        assert_eq!(
            summarize_output(output, 300),
            "Fixed the bug.\nFiles changed: a.rs"
        );
        assert_eq!(summarize_output("SUMMARY:   short", 300), "short");
    }

    #[test]
    fn summary_falls_back_to_prefix() {
        let output = "x".repeat(500);
        assert_eq!(summarize_output(&output, 300).len(), 300);
        assert_eq!(summarize_output("", 300), "");
    }

    #[test]
    fn summary_truncates_on_char_boundaries() {
        let output = "Summary: ".to_string() + &"é".repeat(10);
        assert_eq!(summarize_output(&output, 4), "éééé");
    }

    #[test]
    fn message_includes_git_and_error_lines() {
        let notice = CompletionNotice {
            task_id: 5,
            title: "Fix".into(),
            status: TaskStatus::Failed,
            provider: Some("codex".into()),
            worker: Some("brave-otter".into()),
            summary: String::new(),
            error_detail: Some("claude failed".into()),
            branch_name: Some("agent/task-5-fix".into()),
            commit_hash: None,
        };
        let text = notice.message();
        assert!(text.starts_with("Task 5: Fix\nStatus: failed\nProvider: codex\nWorker: brave-otter\n"));
        assert!(text.contains("Error: claude failed\n"));
        assert!(text.contains("Branch: agent/task-5-fix\n"));
        assert!(!text.contains("Summary:"));
    }

    #[test]
    fn unconfigured_telegram_falls_back_to_log() {
        let notifier = notifier_from_config(&TelegramConfig::default());
        assert_eq!(notifier.name(), "log");

        let notifier = notifier_from_config(&TelegramConfig {
            bot_token: Some("t".into()),
            chat_id: Some("1".into()),
        });
        assert_eq!(notifier.name(), "telegram");
    }
}
