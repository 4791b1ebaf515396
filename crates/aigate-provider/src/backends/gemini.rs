//! Gemini backend authenticated with gemini-cli OAuth credentials.
//!
//! Construction never fails: when no credentials can be loaded the adapter
//! stays registered and surfaces a configuration error on first use.

use aigate_common::{Config, Protocol};
use aigate_protocol::gemini::GenerateContentResponse;
use aigate_protocol::sse::NdjsonParser;
use aigate_translate::{ProtocolRequest, ProtocolResponse, StreamChunk};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::adapter::{
    Adapter, AdapterError, AdapterResult, ChunkReceiver, STREAM_CHANNEL_CAPACITY,
};
use crate::credentials::{
    gemini_default_creds_path, load_credential_bytes, parse_credentials, OAuthTokens,
};
use crate::http;
use crate::retry::{with_retry, RetryPolicy};

const API_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";
/// Tokens within five minutes of expiry get the loading sequence re-run.
const REFRESH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct GeminiAdapter {
    client: wreq::Client,
    creds_base64: Option<String>,
    creds_file: Option<String>,
    tokens: RwLock<Option<OAuthTokens>>,
    retry: RetryPolicy,
}

impl GeminiAdapter {
    pub fn new(config: &Config) -> AdapterResult<Self> {
        let mut adapter = Self {
            client: http::build_client(None)?,
            creds_base64: config.gemini_oauth_creds_base64.clone(),
            creds_file: config.gemini_oauth_creds_file.clone(),
            tokens: RwLock::new(None),
            retry: RetryPolicy::from_config(config),
        };
        match adapter.load_tokens() {
            Ok(Some(tokens)) => *adapter.tokens.get_mut() = Some(tokens),
            Ok(None) => warn!("no Gemini OAuth credentials found, deferring to first call"),
            Err(err) => warn!(error = %err, "failed to load Gemini OAuth credentials"),
        }
        Ok(adapter)
    }

    fn load_tokens(&self) -> AdapterResult<Option<OAuthTokens>> {
        let bytes = load_credential_bytes(
            self.creds_base64.as_deref(),
            self.creds_file.as_deref(),
            gemini_default_creds_path(),
        )?;
        match bytes {
            Some(bytes) => Ok(Some(parse_credentials(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Current access token; re-runs the loading sequence (and, when a
    /// refresh token is available, the google token exchange) for tokens
    /// within the refresh window.
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
        // Another caller may have refreshed while we waited for the lock.
        if let Some(tokens) = guard.as_ref() {
            if !tokens.expires_within(REFRESH_WINDOW_SECS) {
                return Ok(tokens.access_token.clone());
            }
        }

        let mut loaded = self.load_tokens()?.ok_or_else(|| {
            AdapterError::Config("no Gemini OAuth credentials found".to_string())
        })?;
        if loaded.expires_within(REFRESH_WINDOW_SECS) {
            if let Some(refresh_token) = loaded.refresh_token.clone() {
                match self.exchange_refresh_token(&refresh_token).await {
                    Ok(tokens) => {
                        info!("gemini access token refreshed");
                        loaded = tokens;
                    }
                    Err(err) => warn!(error = %err, "gemini token refresh failed"),
                }
            }
        }
        let token = loaded.access_token.clone();
        *guard = Some(loaded);
        Ok(token)
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> AdapterResult<OAuthTokens> {
        let form = [
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let value = http::execute_json(self.client.post(TOKEN_URL).form(&form)).await?;
        let response: TokenResponse =
            serde_json::from_value(value).map_err(|err| AdapterError::Decode(err.to_string()))?;
        let expiry_date = response.expires_in.map(|secs| {
            (OffsetDateTime::now_utc().unix_timestamp() + secs) * 1000
        });
        Ok(OAuthTokens {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expiry_date,
        })
    }

    fn request_body(&self, request: ProtocolRequest) -> AdapterResult<Value> {
        let ProtocolRequest::Gemini(mut body) = request else {
            return Err(AdapterError::InvalidRequest(
                "gemini backend expects a gemini-schema body".to_string(),
            ));
        };
        // The model rides in the URL.
        body.model = None;
        serde_json::to_value(&body).map_err(|err| AdapterError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Gemini
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
        let url = format!("{API_ENDPOINT}/models/{model}:generateContent");
        let body = self.request_body(request)?;
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
        Ok(ProtocolResponse::Gemini(response))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ChunkReceiver> {
        let token = self.ensure_token().await?;
        let url = format!("{API_ENDPOINT}/models/{model}:streamGenerateContent");
        let body = self.request_body(request)?;
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
            let mut parser = NdjsonParser::new();
            'read: while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(error = %err, "gemini stream interrupted");
                        break;
                    }
                };
                for line in parser.push_bytes(&chunk) {
                    let Some(parsed) = decode_stream_line(&line) else {
                        continue;
                    };
                    if tx.send(StreamChunk::Gemini(parsed)).await.is_err() {
                        break 'read;
                    }
                }
            }
            if let Some(tail) = parser.finish() {
                if let Some(parsed) = decode_stream_line(&tail) {
                    let _ = tx.send(StreamChunk::Gemini(parsed)).await;
                }
            }
        });
        Ok(rx)
    }

    async fn list_models(&self) -> AdapterResult<Value> {
        Ok(json!({
            "models": [
                {"name": "models/gemini-2.5-flash"},
                {"name": "models/gemini-2.5-pro"}
            ]
        }))
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

/// Parse one stream line; tolerates the array framing some deployments use
/// by trimming brackets and separators around each document.
fn decode_stream_line(line: &str) -> Option<GenerateContentResponse> {
    let trimmed = line
        .trim()
        .trim_start_matches(['[', ','])
        .trim_end_matches([']', ','])
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_lines_tolerate_array_framing() {
        assert!(decode_stream_line(r#"{"candidates":[]}"#).is_some());
        assert!(decode_stream_line(r#"[{"candidates":[]},"#).is_some());
        assert!(decode_stream_line(r#"{"candidates":[]}]"#).is_some());
        assert!(decode_stream_line("[").is_none());
        assert!(decode_stream_line("not json").is_none());
    }
}
