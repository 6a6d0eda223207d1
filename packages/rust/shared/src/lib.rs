//! Shared types, error model, and configuration for ChatBox.
//!
//! This crate is the foundation depended on by all other ChatBox crates.
//! It provides:
//! - [`ChatBoxError`] — the unified error type
//! - Domain types ([`Query`], [`Answer`], [`ChatMessage`], [`SessionId`])
//! - Configuration ([`AppConfig`], [`RetryConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChatConfig, GeminiConfig, RetryConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_api_key,
};
pub use error::{ChatBoxError, Result};
pub use types::{Answer, ChatMessage, Query, Role, SessionId};
