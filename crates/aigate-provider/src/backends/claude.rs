//! Anthropic Messages backend.
//!
//! Streaming uses the two-line SSE framing (`event:` + `data:`); the event
//! name is folded into the JSON chunk under `type` before decoding so the
//! typed stream-event union sees one self-describing document.

use aigate_common::{Config, Protocol};
use aigate_protocol::claude::{self, ANTHROPIC_VERSION};
use aigate_protocol::sse::SseParser;
use aigate_translate::{ProtocolRequest, ProtocolResponse, StreamChunk};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::warn;

use crate::adapter::{
    Adapter, AdapterError, AdapterResult, ChunkReceiver, STREAM_CHANNEL_CAPACITY,
};
use crate::backends::openai::base_url;
use crate::http;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const STATIC_MODELS: &[&str] = &["claude-3-7-sonnet-20250219", "claude-3-5-sonnet-20241022"];

pub struct ClaudeAdapter {
    client: wreq::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl ClaudeAdapter {
    pub fn new(config: &Config) -> AdapterResult<Self> {
        let api_key = config
            .claude_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AdapterError::Config("claude API key is required".to_string()))?;
        Ok(Self {
            client: http::build_client(None)?,
            api_key,
            base_url: base_url(config.claude_base_url.as_deref(), DEFAULT_BASE_URL),
            retry: RetryPolicy::from_config(config),
        })
    }

    fn request_body(&self, model: &str, request: ProtocolRequest, stream: bool) -> AdapterResult<Value> {
        let ProtocolRequest::Claude(mut body) = request else {
            return Err(AdapterError::InvalidRequest(
                "claude backend expects a claude-schema body".to_string(),
            ));
        };
        body.model = Some(model.to_string());
        body.stream = stream.then_some(true);
        body.anthropic_version = Some(ANTHROPIC_VERSION.to_string());
        serde_json::to_value(&body).map_err(|err| AdapterError::Decode(err.to_string()))
    }

    fn messages_request(&self, body: &Value) -> wreq::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }
}

#[async_trait]
impl Adapter for ClaudeAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Claude
    }

    fn is_initialized(&self) -> bool {
        true
    }

    async fn generate_content(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ProtocolResponse> {
        let body = self.request_body(model, request, false)?;
        let value = with_retry(self.retry, || {
            http::execute_json(self.messages_request(&body))
        })
        .await?;
        let response =
            serde_json::from_value(value).map_err(|err| AdapterError::Decode(err.to_string()))?;
        Ok(ProtocolResponse::Claude(response))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ChunkReceiver> {
        let body = self.request_body(model, request, true)?;
        let response = http::execute_stream(self.messages_request(&body)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = SseParser::new();
            'read: while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(error = %err, "claude stream interrupted");
                        break;
                    }
                };
                for event in parser.push_bytes(&chunk) {
                    let Some(parsed) = decode_event(&event.data, event.event.as_deref()) else {
                        continue;
                    };
                    if tx.send(StreamChunk::Claude(parsed)).await.is_err() {
                        break 'read;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn list_models(&self) -> AdapterResult<Value> {
        let models: Vec<Value> = STATIC_MODELS
            .iter()
            .map(|id| json!({"id": id}))
            .collect();
        Ok(json!({"models": models}))
    }

    async fn refresh_token(&self) -> AdapterResult<()> {
        // Static API key.
        Ok(())
    }
}

/// Decode one SSE data payload, attaching the `event:` name as the chunk's
/// `type` when the payload does not already carry one.
fn decode_event(data: &str, event_name: Option<&str>) -> Option<claude::StreamEvent> {
    let mut value: Value = serde_json::from_str(data).ok()?;
    if value.get("type").is_none() {
        if let (Some(name), Some(obj)) = (event_name, value.as_object_mut()) {
            obj.insert("type".to_string(), Value::String(name.to_string()));
        }
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigate_common::ConfigPatch;

    #[test]
    fn upstream_body_carries_model_stream_and_api_version() {
        let mut config = ConfigPatch::default().into_config();
        config.claude_api_key = Some("sk-test".to_string());
        let adapter = ClaudeAdapter::new(&config).unwrap();

        let request = ProtocolRequest::Claude(
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap(),
        );
        let body = adapter
            .request_body("claude-3-7-sonnet-20250219", request, true)
            .unwrap();
        assert_eq!(body["model"], "claude-3-7-sonnet-20250219");
        assert_eq!(body["stream"], true);
        assert_eq!(body["anthropic-version"], ANTHROPIC_VERSION);
    }

    #[test]
    fn wrong_schema_bodies_are_rejected() {
        let mut config = ConfigPatch::default().into_config();
        config.claude_api_key = Some("sk-test".to_string());
        let adapter = ClaudeAdapter::new(&config).unwrap();
        let request = ProtocolRequest::OpenAI(Default::default());
        let err = adapter.request_body("m", request, false).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidRequest(_)));
    }

    #[test]
    fn event_name_is_attached_when_data_has_no_type() {
        let event = decode_event(r#"{"index":0,"delta":{"type":"text_delta","text":"x"}}"#,
            Some("content_block_delta"))
        .unwrap();
        match event {
            claude::StreamEvent::ContentBlockDelta { delta, .. } => {
                assert_eq!(delta.text.as_deref(), Some("x"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn payload_type_wins_over_event_name() {
        let event = decode_event(r#"{"type":"message_stop"}"#, Some("something_else")).unwrap();
        assert!(matches!(event, claude::StreamEvent::MessageStop));
    }
}
