//! agent-queue library
//!
//! A local task queue that runs coding requests through code-generation
//! CLIs. Exports the core components for testing and integration.

pub mod chain;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod git;
pub mod lock;
pub mod notify;
pub mod prompt;
pub mod provider;
pub mod safety;
pub mod scheduler;
pub mod types;
pub mod worker;
