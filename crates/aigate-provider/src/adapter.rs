use aigate_common::Protocol;
use aigate_translate::{ProtocolRequest, ProtocolResponse, StreamChunk};
use async_trait::async_trait;
use serde_json::Value;

/// Capacity of the chunk channel between a backend reader and the request
/// task; the sender blocks when the gateway falls behind.
pub const STREAM_CHANNEL_CAPACITY: usize = 10;

pub type ChunkReceiver = tokio::sync::mpsc::Receiver<StreamChunk>;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Missing or unusable credential at construction or call time.
    #[error("configuration error: {0}")]
    Config(String),
    /// 401/403 from a backend.
    #[error("upstream auth error ({status}): {message}")]
    Auth { status: u16, message: String },
    /// Any other non-2xx from a backend; message surfaced verbatim.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    /// Malformed upstream body.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
    /// Connection-level failure (no HTTP response).
    #[error("transport error: {0}")]
    Transport(String),
    /// The caller handed this adapter a body in the wrong schema, or the
    /// body is unusable (e.g. no messages).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("max retries ({retries}) exceeded: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<AdapterError>,
    },
}

impl AdapterError {
    /// Map a non-2xx upstream status to the matching error kind.
    pub fn from_status(status: u16, body: &[u8]) -> AdapterError {
        let message = String::from_utf8_lossy(body).to_string();
        if status == 401 || status == 403 {
            AdapterError::Auth { status, message }
        } else {
            AdapterError::Upstream { status, message }
        }
    }

    /// Transport failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Transport(_) => true,
            AdapterError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the pool should count this failure against the credential.
    pub fn counts_against_credential(&self) -> bool {
        matches!(
            self,
            AdapterError::Auth { .. }
                | AdapterError::Upstream { .. }
                | AdapterError::Transport(_)
                | AdapterError::RetriesExhausted { .. }
        )
    }
}

/// The contract every backend implements.
///
/// Bodies arrive already translated into the backend's native schema; the
/// adapter only adds authentication, shaping and transport.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The wire schema this backend speaks.
    fn protocol(&self) -> Protocol;

    fn is_initialized(&self) -> bool;

    async fn generate_content(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ProtocolResponse>;

    async fn generate_content_stream(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ChunkReceiver>;

    /// Model catalogue in the backend's native listing shape.
    async fn list_models(&self) -> AdapterResult<Value>;

    /// Refresh the backing credential if it is close to expiry.
    /// A no-op for static-key backends; safe to call repeatedly.
    async fn refresh_token(&self) -> AdapterResult<()>;
}
