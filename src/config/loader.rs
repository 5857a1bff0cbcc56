//! Configuration file discovery and environment overrides.

use super::types::Config;
use crate::error::TaskError;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_DIR_NAME: &str = ".agent-queue";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Where configuration is looked up.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Explicit `--config` path (overrides discovery).
    pub explicit: Option<PathBuf>,
    /// Base directory holding `.agent-queue/` (`AGENT_QUEUE_HOME`, else the CWD).
    pub home_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover paths from the environment.
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        let home_dir = std::env::var("AGENT_QUEUE_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| expand_home(Path::new(&v)));

        Self {
            explicit: explicit.map(|p| expand_home(&p)),
            home_dir,
        }
    }

    /// Base directory that relative paths in the config resolve against.
    pub fn base_dir(&self) -> PathBuf {
        self.home_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// The config file to read or create.
    pub fn config_file(&self) -> PathBuf {
        match self.explicit {
            Some(ref path) => path.clone(),
            None => self.base_dir().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// The file that was read, if one existed.
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration using the process environment.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        Self::load_with(ConfigPaths::discover(explicit), |key| std::env::var(key).ok())
    }

    /// Load configuration with explicit paths and an environment lookup.
    ///
    /// An explicit path that does not exist is an error; a missing
    /// discovered file falls back to defaults.
    pub fn load_with<F>(paths: ConfigPaths, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = paths.config_file();

        let (mut config, config_path) = if file.exists() {
            debug!(path = %file.display(), "Loading config");
            (Config::load(&file)?, Some(file))
        } else if paths.explicit.is_some() {
            return Err(TaskError::config(format!(
                "Config file not found: {}",
                file.display()
            ))
            .into());
        } else {
            debug!(path = %file.display(), "No config file, using defaults");
            (Config::default(), None)
        };

        apply_env_overrides(&mut config, env);

        config.database.path = expand_home(&config.database.path);
        if config.database.path.is_relative() {
            config.database.path = paths.base_dir().join(&config.database.path);
        }

        Ok(Self {
            paths,
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// Apply `AGENT_QUEUE_*` overrides. Unparseable numeric values are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(db_path) = env("AGENT_QUEUE_DB_PATH") {
        config.database.path = PathBuf::from(db_path);
    }

    if let Some(workers) = env("AGENT_QUEUE_WORKERS") {
        match workers.parse() {
            Ok(count) => config.workers.count = count,
            Err(_) => warn!(value = %workers, "Ignoring invalid AGENT_QUEUE_WORKERS"),
        }
    }

    if let Some(ttl) = env("AGENT_QUEUE_LOCK_TTL") {
        match ttl.parse() {
            Ok(seconds) => config.locks.ttl_seconds = seconds,
            Err(_) => warn!(value = %ttl, "Ignoring invalid AGENT_QUEUE_LOCK_TTL"),
        }
    }

    if let Some(token) = env("AGENT_QUEUE_TELEGRAM_TOKEN") {
        config.telegram.bot_token = Some(token);
    }

    if let Some(chat_id) = env("AGENT_QUEUE_TELEGRAM_CHAT_ID") {
        config.telegram.chat_id = Some(chat_id);
    }
}
