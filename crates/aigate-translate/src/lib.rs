//! Bidirectional translation among the three chat protocols.
//!
//! Conversions are pure: each protocol body lowers into a neutral envelope
//! (ordered turns, system text, generation config, usage) and raises into
//! any target schema. Missing fields read as empty; nothing here returns an
//! error for shape mismatches.

pub mod chunk;
pub mod envelope;
pub mod request;
pub mod response;
pub mod types;

#[cfg(test)]
mod tests;

pub use chunk::{convert_chunk, delta_text};
pub use envelope::{ChatRequest, ChatResponse, FinishReason, Role, TokenUsage, Turn};
pub use request::convert_request;
pub use response::convert_response;
pub use types::{ProtocolRequest, ProtocolResponse, StreamChunk};
