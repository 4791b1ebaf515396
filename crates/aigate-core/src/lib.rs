//! The HTTP gateway: routing, auth, per-request provider resolution,
//! system-prompt injection, prompt logging, translation orchestration and
//! stream re-emission.

pub mod auth;
pub mod cron;
pub mod error;
pub mod extract;
mod handler;
pub mod inject;
pub mod prompt_log;
pub mod router;
pub mod state;
pub mod stream;

pub use cron::spawn_token_refresh;
pub use router::gateway_router;
pub use state::GatewayState;
