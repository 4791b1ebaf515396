//! Typed wire schemas for the three chat protocols the gateway speaks,
//! plus the incremental stream parsers (SSE and newline-delimited JSON).
//!
//! The DTOs cover the text surface the gateway translates; fields it does
//! not interpret are preserved through `#[serde(flatten)]` extra maps so
//! pass-through bodies survive a decode/encode round trip.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;
