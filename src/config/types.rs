//! Configuration types and structures.

use crate::format::OutputFormat;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub locks: LocksConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Default output format for `list` and `show`.
    #[serde(default)]
    pub default_format: OutputFormat,
}

impl Config {
    /// Load configuration from a YAML file. Missing sections take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Write this configuration as YAML, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.database.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn lock_ttl_ms(&self) -> i64 {
        self.locks.ttl_seconds as i64 * 1000
    }
}

/// Task store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".agent-queue/queue.db")
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent workers started by `run`.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Backoff when the queue holds no pending work (default: 2000).
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Backoff when pending work exists but none is eligible (default: 500).
    #[serde(default = "default_blocked_backoff_ms")]
    pub blocked_backoff_ms: u64,

    /// How often a running task refreshes its repository lock (default: 10000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            idle_backoff_ms: default_idle_backoff_ms(),
            blocked_backoff_ms: default_blocked_backoff_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

fn default_worker_count() -> usize {
    2
}

fn default_idle_backoff_ms() -> u64 {
    2000
}

fn default_blocked_backoff_ms() -> u64 {
    500
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

/// Repository lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksConfig {
    /// A lock whose heartbeat is older than this is stale (default: 60).
    #[serde(default = "default_lock_ttl")]
    pub ttl_seconds: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_lock_ttl(),
        }
    }
}

fn default_lock_ttl() -> u64 {
    60
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Selection retries after a lost compare-and-swap before reporting blocked.
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: default_max_cas_retries(),
        }
    }
}

fn default_max_cas_retries() -> u32 {
    5
}

/// How the compiled prompt reaches the provider process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Written to the child's stdin.
    #[default]
    Stdin,
    /// Passed as `<prompt_flag> <prompt>`; stdin is closed.
    Argument,
}

/// A subprocess provider definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Program followed by its fixed arguments.
    pub command: Vec<String>,

    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Flag preceding the prompt when `delivery` is `argument`.
    #[serde(default = "default_prompt_flag")]
    pub prompt_flag: String,

    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

fn default_prompt_flag() -> String {
    "--prompt".to_string()
}

fn default_primary_provider() -> ProviderConfig {
    ProviderConfig {
        name: "claude".to_string(),
        command: vec!["claude".to_string()],
        delivery: DeliveryMode::Stdin,
        prompt_flag: default_prompt_flag(),
        env: BTreeMap::new(),
    }
}

fn default_fallback_provider() -> Option<ProviderConfig> {
    Some(ProviderConfig {
        name: "codex".to_string(),
        command: vec!["codex".to_string()],
        delivery: DeliveryMode::Argument,
        prompt_flag: default_prompt_flag(),
        env: BTreeMap::from([("CI".to_string(), "1".to_string())]),
    })
}

/// Provider routing configuration: one primary, at most one fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_primary_provider")]
    pub primary: ProviderConfig,

    #[serde(default = "default_fallback_provider")]
    pub fallback: Option<ProviderConfig>,

    /// Per-invocation timeout (default: 1800).
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_provider(),
            fallback: default_fallback_provider(),
            timeout_seconds: default_provider_timeout(),
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_provider_timeout() -> u64 {
    1800
}

/// Pre-execution safety gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Case-insensitive substrings that block a task unless it is marked dangerous_ok.
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
        }
    }
}

pub fn default_denylist() -> Vec<String> {
    [
        "rm -rf",
        "git push --force",
        "git push -f",
        "git reset --hard",
        "mkfs",
        "dd if=",
        "drop database",
        ":(){",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Git workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Create or switch to a per-task branch before running the provider.
    #[serde(default = "default_true")]
    pub auto_branch: bool,

    #[serde(default = "default_true")]
    pub auto_commit: bool,

    #[serde(default)]
    pub auto_push: bool,

    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_branch: true,
            auto_commit: true,
            auto_push: false,
            remote: default_remote(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch_prefix() -> String {
    "agent/".to_string()
}

/// Telegram notifier credentials. Notifications are skipped unless both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,

    #[serde(default)]
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        matches!(
            (self.bot_token.as_deref(), self.chat_id.as_deref()),
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.locks.ttl_seconds, 60);
        assert_eq!(config.providers.primary.name, "claude");
        assert_eq!(
            config.providers.fallback.as_ref().map(|p| p.delivery),
            Some(DeliveryMode::Argument)
        );
        assert!(config.safety.denylist.iter().any(|p| p == "rm -rf"));
        assert_eq!(config.lock_ttl_ms(), 60_000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
workers:
  count: 4
git:
  auto_push: true
providers:
  fallback: null
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.workers.idle_backoff_ms, 2000);
        assert!(config.git.auto_push);
        assert_eq!(config.git.remote, "origin");
        assert!(config.providers.fallback.is_none());
    }

    #[test]
    fn telegram_requires_both_fields() {
        let mut telegram = TelegramConfig::default();
        assert!(!telegram.is_configured());
        telegram.bot_token = Some("token".into());
        assert!(!telegram.is_configured());
        telegram.chat_id = Some("42".into());
        assert!(telegram.is_configured());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");
        let mut config = Config::default();
        config.workers.count = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.workers.count, 7);
    }
}
