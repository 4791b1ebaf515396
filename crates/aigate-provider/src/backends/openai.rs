//! OpenAI-compatible backend: static bearer key against a configurable
//! base URL.

use aigate_common::{Config, Protocol};
use aigate_protocol::openai::ChatCompletionChunk;
use aigate_protocol::sse::SseParser;
use aigate_translate::{ProtocolRequest, ProtocolResponse, StreamChunk};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::warn;

use crate::adapter::{
    Adapter, AdapterError, AdapterResult, ChunkReceiver, STREAM_CHANNEL_CAPACITY,
};
use crate::http;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const SSE_DONE: &str = "[DONE]";

pub struct OpenAIAdapter {
    client: wreq::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAIAdapter {
    pub fn new(config: &Config) -> AdapterResult<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AdapterError::Config("openai API key is required".to_string()))?;
        Ok(Self {
            client: http::build_client(None)?,
            api_key,
            base_url: base_url(config.openai_base_url.as_deref(), DEFAULT_BASE_URL),
            retry: RetryPolicy::from_config(config),
        })
    }

    fn request_body(&self, model: &str, request: ProtocolRequest, stream: bool) -> AdapterResult<Value> {
        let ProtocolRequest::OpenAI(mut body) = request else {
            return Err(AdapterError::InvalidRequest(
                "openai backend expects an openai-schema body".to_string(),
            ));
        };
        body.model = Some(model.to_string());
        body.stream = stream.then_some(true);
        serde_json::to_value(&body).map_err(|err| AdapterError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Adapter for OpenAIAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAI
    }

    fn is_initialized(&self) -> bool {
        true
    }

    async fn generate_content(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ProtocolResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(model, request, false)?;
        let value = with_retry(self.retry, || {
            http::execute_json(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&body),
            )
        })
        .await?;
        let response =
            serde_json::from_value(value).map_err(|err| AdapterError::Decode(err.to_string()))?;
        Ok(ProtocolResponse::OpenAI(response))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ChunkReceiver> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(model, request, true)?;
        let response = http::execute_stream(
            self.client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body),
        )
        .await?;

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = SseParser::new();
            'read: while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(error = %err, "openai stream interrupted");
                        break;
                    }
                };
                for event in parser.push_bytes(&chunk) {
                    if event.data == SSE_DONE {
                        break 'read;
                    }
                    let Ok(parsed) = serde_json::from_str::<ChatCompletionChunk>(&event.data)
                    else {
                        continue;
                    };
                    if tx.send(StreamChunk::OpenAI(parsed)).await.is_err() {
                        break 'read;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn list_models(&self) -> AdapterResult<Value> {
        let url = format!("{}/models", self.base_url);
        with_retry(self.retry, || {
            http::execute_json(
                self.client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key)),
            )
        })
        .await
    }

    async fn refresh_token(&self) -> AdapterResult<()> {
        // Static API key.
        Ok(())
    }
}

pub(crate) fn base_url(configured: Option<&str>, default: &str) -> String {
    configured
        .filter(|url| !url.trim().is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}
