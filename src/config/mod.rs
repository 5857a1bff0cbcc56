//! Configuration system.
//!
//! Resolution order:
//! 1. `--config <path>` (must exist)
//! 2. `$AGENT_QUEUE_HOME/.agent-queue/config.yaml`
//! 3. `./.agent-queue/config.yaml`
//! 4. Built-in defaults
//!
//! ## Environment Variables
//! - `AGENT_QUEUE_HOME` - Base directory holding `.agent-queue/`
//! - `AGENT_QUEUE_DB_PATH` - Database path
//! - `AGENT_QUEUE_WORKERS` - Worker count
//! - `AGENT_QUEUE_LOCK_TTL` - Repository lock TTL in seconds
//! - `AGENT_QUEUE_TELEGRAM_TOKEN` / `AGENT_QUEUE_TELEGRAM_CHAT_ID` - Notifier credentials

mod loader;
mod types;

pub use loader::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, ConfigLoader, ConfigPaths, apply_env_overrides,
    expand_home,
};
pub use types::*;
