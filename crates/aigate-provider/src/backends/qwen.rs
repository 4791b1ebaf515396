//! Qwen backend: OpenAI-shaped calls authenticated with the Qwen CLI's
//! OAuth credential file. The CLI owns the refresh flow, so a stale token
//! is handled by reloading the file it maintains.

use aigate_common::{Config, Protocol};
use aigate_protocol::openai::ChatCompletionChunk;
use aigate_protocol::sse::SseParser;
use aigate_translate::{ProtocolRequest, ProtocolResponse, StreamChunk};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;

use crate::adapter::{
    Adapter, AdapterError, AdapterResult, ChunkReceiver, STREAM_CHANNEL_CAPACITY,
};
use crate::backends::openai::SSE_DONE;
use crate::credentials::{load_credential_bytes, parse_credentials, qwen_default_creds_path, OAuthTokens};
use crate::http;
use crate::retry::{with_retry, RetryPolicy};

const API_BASE: &str = "https://api.qwen.aliyun.com/v1";
const REFRESH_WINDOW_SECS: i64 = 300;

const STATIC_MODELS: &[&str] = &["qwen3-coder-plus", "qwen3-coder-flash"];

pub struct QwenAdapter {
    client: wreq::Client,
    creds_file: Option<String>,
    tokens: RwLock<Option<OAuthTokens>>,
    retry: RetryPolicy,
}

impl QwenAdapter {
    pub fn new(config: &Config) -> AdapterResult<Self> {
        let mut adapter = Self {
            client: http::build_client(None)?,
            creds_file: config.qwen_oauth_creds_file.clone(),
            tokens: RwLock::new(None),
            retry: RetryPolicy::from_config(config),
        };
        match adapter.load_tokens() {
            Ok(Some(tokens)) => *adapter.tokens.get_mut() = Some(tokens),
            Ok(None) => warn!("no Qwen OAuth credentials found, deferring to first call"),
            Err(err) => warn!(error = %err, "failed to load Qwen OAuth credentials"),
        }
        Ok(adapter)
    }

    fn load_tokens(&self) -> AdapterResult<Option<OAuthTokens>> {
        let bytes =
            load_credential_bytes(None, self.creds_file.as_deref(), qwen_default_creds_path())?;
        match bytes {
            Some(bytes) => Ok(Some(parse_credentials(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Current access token; stale tokens re-run the file load, trusting
    /// the Qwen CLI to have rotated the credential on disk.
    async fn ensure_token(&self) -> AdapterResult<String> {
        {
            let guard = self.tokens.read().await;
            if let Some(tokens) = guard.as_ref() {
                if !tokens.expires_within(REFRESH_WINDOW_SECS) {
                    return Ok(tokens.access_token.clone());
                }
            }
        }
        let mut guard = self.tokens.write().await;
        if let Some(tokens) = guard.as_ref() {
            if !tokens.expires_within(REFRESH_WINDOW_SECS) {
                return Ok(tokens.access_token.clone());
            }
        }
        let loaded = self
            .load_tokens()?
            .ok_or_else(|| AdapterError::Config("no Qwen OAuth credentials found".to_string()))?;
        if loaded.expires_within(0) {
            warn!("qwen access token is expired; using it anyway pending CLI refresh");
        }
        let token = loaded.access_token.clone();
        *guard = Some(loaded);
        Ok(token)
    }

    fn request_body(&self, model: &str, request: ProtocolRequest, stream: bool) -> AdapterResult<Value> {
        let ProtocolRequest::OpenAI(mut body) = request else {
            return Err(AdapterError::InvalidRequest(
                "qwen backend expects an openai-schema body".to_string(),
            ));
        };
        body.model = Some(model.to_string());
        body.stream = stream.then_some(true);
        serde_json::to_value(&body).map_err(|err| AdapterError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Adapter for QwenAdapter {
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
        let token = self.ensure_token().await?;
        let url = format!("{API_BASE}/chat/completions");
        let body = self.request_body(model, request, false)?;
        let value = with_retry(self.retry, || {
            http::execute_json(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("Authorization", format!("Bearer {token}"))
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
        let token = self.ensure_token().await?;
        let url = format!("{API_BASE}/chat/completions");
        let body = self.request_body(model, request, true)?;
        let response = http::execute_stream(
            self.client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
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
                        warn!(error = %err, "qwen stream interrupted");
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
        let models: Vec<Value> = STATIC_MODELS
            .iter()
            .map(|id| json!({"id": id, "object": "model", "owned_by": "qwen"}))
            .collect();
        Ok(json!({"object": "list", "data": models}))
    }

    async fn refresh_token(&self) -> AdapterResult<()> {
        let near_expiry = {
            let guard = self.tokens.read().await;
            guard
                .as_ref()
                .map(|tokens| tokens.expires_within(REFRESH_WINDOW_SECS))
                .unwrap_or(false)
        };
        if near_expiry {
            self.ensure_token().await?;
        }
        Ok(())
    }
}
