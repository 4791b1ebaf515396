//! Shared configuration and identifiers for aigate.
//!
//! This crate carries no IO beyond reading the system prompt file at
//! bootstrap; everything else is plain data used by the gateway, the
//! adapters and the pool manager.

pub mod config;
pub mod provider;
pub mod util;

pub use config::{Config, ConfigError, ConfigPatch, PromptLogMode, SystemPromptMode};
pub use provider::{protocol_prefix, Protocol, Provider};
pub use util::{decode_base64, expand_home};
