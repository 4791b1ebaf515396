//! Kiro (CodeWhisperer) backend.
//!
//! Speaks the Claude schema on the gateway side; each call is reshaped into
//! a CodeWhisperer `conversationState` and the AWS event-stream reply is
//! reduced to text. The upstream cannot stream incrementally, so streaming
//! requests run the unary call and synthesise a Claude event sequence.

use aigate_common::{Config, Protocol};
use aigate_protocol::claude;
use aigate_translate::envelope::new_message_id;
use aigate_translate::{ProtocolRequest, ProtocolResponse, StreamChunk};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{
    Adapter, AdapterError, AdapterResult, ChunkReceiver, STREAM_CHANNEL_CAPACITY,
};
use crate::credentials::{kiro_default_creds_path, load_credential_bytes, parse_credentials, KiroTokens};
use crate::http;
use crate::retry::{with_retry, RetryPolicy};

const AUTH_METHOD_SOCIAL: &str = "social";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
/// Simulated streaming makes the unary call do all the work; give it room.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Tokens within ten minutes of expiry are refreshed by the cron hook.
const REFRESH_WINDOW: time::Duration = time::Duration::minutes(10);

const MODEL_MAP: &[(&str, &str)] = &[
    ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("amazonq-claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("amazonq-claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("amazonq-claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
];

#[derive(Debug, Default, Clone)]
struct KiroState {
    access_token: String,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    profile_arn: Option<String>,
    region: String,
    auth_method: String,
    expires_at: Option<OffsetDateTime>,
}

impl KiroState {
    fn apply(&mut self, tokens: KiroTokens) {
        let expires_at = tokens.expires_at_time();
        if let Some(token) = tokens.access_token {
            self.access_token = token;
        }
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        if tokens.client_id.is_some() {
            self.client_id = tokens.client_id;
        }
        if tokens.client_secret.is_some() {
            self.client_secret = tokens.client_secret;
        }
        if tokens.profile_arn.is_some() {
            self.profile_arn = tokens.profile_arn;
        }
        self.expires_at = expires_at.or(self.expires_at);
        if let Some(region) = tokens.region.filter(|region| !region.is_empty()) {
            self.region = region;
        }
        if let Some(method) = tokens.auth_method {
            self.auth_method = method;
        }
    }
}

pub struct KiroAdapter {
    client: wreq::Client,
    creds_base64: Option<String>,
    creds_file: Option<String>,
    state: RwLock<KiroState>,
    mac_sha256: String,
    retry: RetryPolicy,
}

impl KiroAdapter {
    pub async fn new(config: &Config) -> AdapterResult<Self> {
        let adapter = Self {
            client: http::build_client(Some(REQUEST_TIMEOUT))?,
            creds_base64: config.kiro_oauth_creds_base64.clone(),
            creds_file: config.kiro_oauth_creds_file.clone(),
            state: RwLock::new(KiroState {
                region: DEFAULT_REGION.to_string(),
                auth_method: AUTH_METHOD_SOCIAL.to_string(),
                ..KiroState::default()
            }),
            mac_sha256: mac_fingerprint(),
            retry: RetryPolicy::from_config(config),
        };
        adapter.initialize_auth(false).await?;
        Ok(adapter)
    }

    /// (Re)load credentials from the configured source and refresh the
    /// access token when forced or absent.
    async fn initialize_auth(&self, force: bool) -> AdapterResult<()> {
        let mut state = self.state.write().await;
        if !force && !state.access_token.is_empty() {
            return Ok(());
        }
        let bytes = load_credential_bytes(
            self.creds_base64.as_deref(),
            self.creds_file.as_deref(),
            kiro_default_creds_path(),
        )?
        .ok_or_else(|| AdapterError::Config("no Kiro OAuth credentials found".to_string()))?;
        let tokens: KiroTokens = parse_credentials(&bytes)?;
        state.apply(tokens);
        if force || state.access_token.is_empty() {
            self.refresh_access_token(&mut state).await?;
        }
        Ok(())
    }

    async fn refresh_access_token(&self, state: &mut KiroState) -> AdapterResult<()> {
        let refresh_token = state
            .refresh_token
            .clone()
            .ok_or_else(|| AdapterError::Config("no refresh token available".to_string()))?;
        let (url, body) = if state.auth_method == AUTH_METHOD_SOCIAL {
            (
                format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", state.region),
                json!({ "refreshToken": refresh_token }),
            )
        } else {
            (
                format!("https://oidc.{}.amazonaws.com/token", state.region),
                json!({
                    "refreshToken": refresh_token,
                    "clientId": state.client_id,
                    "clientSecret": state.client_secret,
                    "grantType": "refresh_token",
                }),
            )
        };
        let (status, response) = http::execute(
            self.client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body),
        )
        .await?;
        if !(200..300).contains(&status) {
            return Err(AdapterError::from_status(status, &response));
        }
        let payload: Value = serde_json::from_slice(&response)
            .map_err(|err| AdapterError::Decode(err.to_string()))?;
        if let Some(token) = payload.get("accessToken").and_then(Value::as_str) {
            state.access_token = token.to_string();
        }
        if let Some(token) = payload.get("refreshToken").and_then(Value::as_str) {
            state.refresh_token = Some(token.to_string());
        }
        if let Some(arn) = payload.get("profileArn").and_then(Value::as_str) {
            state.profile_arn = Some(arn.to_string());
        }
        if let Some(expires_in) = payload.get("expiresIn").and_then(Value::as_f64) {
            state.expires_at =
                Some(OffsetDateTime::now_utc() + time::Duration::seconds(expires_in as i64));
        }
        info!("kiro access token refreshed");
        Ok(())
    }

    /// POST the CodeWhisperer payload; a 403 forces one token refresh and a
    /// single retry.
    async fn call_api(&self, model: &str, payload: &Value) -> AdapterResult<Bytes> {
        let mut refreshed = false;
        loop {
            let (access_token, region) = {
                let state = self.state.read().await;
                (state.access_token.clone(), state.region.clone())
            };
            let url = if model.starts_with("amazonq") {
                format!("https://codewhisperer.{region}.amazonaws.com/SendMessageStreaming")
            } else {
                format!("https://codewhisperer.{region}.amazonaws.com/generateAssistantResponse")
            };
            let (status, body) = http::execute(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("Authorization", format!("Bearer {access_token}"))
                    .header("amz-sdk-invocation-id", Uuid::new_v4().to_string())
                    .header(
                        "x-amz-user-agent",
                        format!("aws-sdk-js/1.0.7 KiroIDE-0.1.25-{}", self.mac_sha256),
                    )
                    .header(
                        "User-Agent",
                        format!(
                            "aws-sdk-js/1.0.7 ua/2.1 os/linux md/nodejs#20.16.0 \
                             api/codewhispererstreaming#1.0.7 m/E KiroIDE-0.1.25-{}",
                            self.mac_sha256
                        ),
                    )
                    .header("amz-sdk-request", "attempt=1; max=1")
                    .header("x-amzn-kiro-agent-mode", "vibe")
                    .json(payload),
            )
            .await?;
            if status == 403 && !refreshed {
                warn!("kiro returned 403, forcing token refresh");
                refreshed = true;
                self.initialize_auth(true).await?;
                continue;
            }
            if !(200..300).contains(&status) {
                return Err(AdapterError::from_status(status, &body));
            }
            return Ok(body);
        }
    }

    async fn build_payload(&self, model: &str, request: ProtocolRequest) -> AdapterResult<Value> {
        let ProtocolRequest::Claude(body) = request else {
            return Err(AdapterError::InvalidRequest(
                "kiro backend expects a claude-schema body".to_string(),
            ));
        };
        let (auth_method, profile_arn) = {
            let state = self.state.read().await;
            (state.auth_method.clone(), state.profile_arn.clone())
        };
        build_codewhisperer_request(model, &body, &auth_method, profile_arn.as_deref())
    }

    async fn generate_text(&self, model: &str, request: ProtocolRequest) -> AdapterResult<String> {
        let payload = self.build_payload(model, request).await?;
        let body = with_retry(self.retry, || self.call_api(model, &payload)).await?;
        Ok(parse_event_stream_text(&body))
    }
}

#[async_trait]
impl Adapter for KiroAdapter {
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
        let text = self.generate_text(model, request).await?;
        Ok(ProtocolResponse::Claude(claude_response(model, text)))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: ProtocolRequest,
    ) -> AdapterResult<ChunkReceiver> {
        // The upstream answers in one piece; stream a synthetic sequence.
        let text = self.generate_text(model, request).await?;
        let events = simulated_stream_events(model, &text);
        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for event in events {
                if tx.send(StreamChunk::Claude(event)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn list_models(&self) -> AdapterResult<Value> {
        let models: Vec<Value> = MODEL_MAP
            .iter()
            .map(|(id, _)| json!({"id": id, "name": id}))
            .collect();
        Ok(json!({"models": models}))
    }

    async fn refresh_token(&self) -> AdapterResult<()> {
        let near_expiry = {
            let state = self.state.read().await;
            state
                .expires_at
                .map(|at| at - OffsetDateTime::now_utc() < REFRESH_WINDOW)
                .unwrap_or(false)
        };
        if near_expiry {
            self.initialize_auth(true).await?;
        }
        Ok(())
    }
}

fn codewhisperer_model(model: &str) -> &'static str {
    MODEL_MAP
        .iter()
        .find(|(id, _)| *id == model)
        .or_else(|| MODEL_MAP.iter().find(|(id, _)| *id == DEFAULT_MODEL))
        .map(|(_, cw)| *cw)
        .unwrap_or("CLAUDE_SONNET_4_5_20250929_V1_0")
}

fn user_input_message(content: String, cw_model: &str) -> Value {
    json!({
        "userInputMessage": {
            "content": content,
            "modelId": cw_model,
            "origin": "AI_EDITOR",
        }
    })
}

fn assistant_response_message(content: String) -> Value {
    json!({ "assistantResponseMessage": { "content": content } })
}

/// Reshape a Claude request into the CodeWhisperer conversation-state
/// payload: all but the last message become history, the last becomes the
/// current message, and a system prompt is prepended to a current user turn.
fn build_codewhisperer_request(
    model: &str,
    body: &claude::MessagesRequest,
    auth_method: &str,
    profile_arn: Option<&str>,
) -> AdapterResult<Value> {
    if body.messages.is_empty() {
        return Err(AdapterError::InvalidRequest("no messages in request".to_string()));
    }
    let cw_model = codewhisperer_model(model);

    let mut history = Vec::new();
    for message in &body.messages[..body.messages.len() - 1] {
        match message.role.as_str() {
            "user" => history.push(user_input_message(message.content.to_text(), cw_model)),
            "assistant" => history.push(assistant_response_message(message.content.to_text())),
            _ => {}
        }
    }

    let current = &body.messages[body.messages.len() - 1];
    let mut current_content = current.content.to_text();
    if let Some(system) = &body.system {
        let system = system.to_text();
        if !system.is_empty() && current.role == "user" {
            current_content = format!("{system}\n\n{current_content}");
        }
    }
    let current_message = if current.role == "user" {
        user_input_message(current_content, cw_model)
    } else {
        assistant_response_message(current_content)
    };

    let mut request = Map::new();
    request.insert(
        "conversationState".to_string(),
        json!({
            "chatTriggerType": "MANUAL",
            "conversationId": Uuid::new_v4().to_string(),
            "currentMessage": current_message,
            "history": history,
        }),
    );
    if auth_method == AUTH_METHOD_SOCIAL {
        if let Some(arn) = profile_arn.filter(|arn| !arn.is_empty()) {
            request.insert("profileArn".to_string(), Value::String(arn.to_string()));
        }
    }
    Ok(Value::Object(request))
}

/// Extract the assistant text from an AWS event-stream body.
///
/// The binary framing is not decoded; instead the body is scanned for
/// `{"content":` anchors and each JSON object is taken with a brace walk
/// that honours strings and escapes. Escaped newlines arrive doubly
/// encoded and are unescaped after parsing.
fn parse_event_stream_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::new();
    let mut search = 0;
    while let Some(found) = text[search..].find("{\"content\":") {
        let start = search + found;
        let Some(len) = balanced_object_len(&text[start..]) else {
            break;
        };
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..start + len]) {
            if let Some(content) = value.get("content").and_then(Value::as_str) {
                out.push_str(&content.replace("\\n", "\n"));
            }
        }
        search = start + len;
    }
    out
}

/// Byte length of the balanced JSON object starting at the first byte,
/// or None when the object is truncated.
fn balanced_object_len(text: &str) -> Option<usize> {
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

fn claude_response(model: &str, text: String) -> claude::MessagesResponse {
    let output_tokens = estimate_tokens(&text);
    claude::MessagesResponse {
        id: new_message_id(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content: vec![claude::ContentBlock::text(text)],
        stop_reason: Some("end_turn".to_string()),
        stop_sequence: Some(Value::Null),
        usage: claude::Usage {
            input_tokens: 0,
            output_tokens,
        },
        extra: Default::default(),
    }
}

/// The synthetic Claude event sequence for a completed response:
/// message_start, content_block_start, one full-text delta,
/// content_block_stop, message_delta, message_stop.
fn simulated_stream_events(model: &str, text: &str) -> Vec<claude::StreamEvent> {
    vec![
        claude::StreamEvent::MessageStart {
            message: claude::StreamMessage {
                id: new_message_id(),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                model: model.to_string(),
                content: Vec::new(),
                usage: claude::Usage::default(),
                extra: Default::default(),
            },
        },
        claude::StreamEvent::ContentBlockStart {
            index: 0,
            content_block: claude::ContentBlock::text(""),
        },
        claude::StreamEvent::ContentBlockDelta {
            index: 0,
            delta: claude::BlockDelta::text_delta(text),
        },
        claude::StreamEvent::ContentBlockStop { index: 0 },
        claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some("end_turn".to_string()),
                stop_sequence: None,
            },
            usage: Some(claude::DeltaUsage {
                input_tokens: None,
                output_tokens: Some(estimate_tokens(text)),
            }),
        },
        claude::StreamEvent::MessageStop,
    ]
}

/// SHA-256 of the primary non-loopback MAC address, computed once at
/// construction; all-zero MAC fallback.
fn mac_fingerprint() -> String {
    let mac = mac_address::get_mac_address()
        .ok()
        .flatten()
        .map(|mac| mac.to_string().to_lowercase())
        .filter(|mac| mac != "00:00:00:00:00:00")
        .unwrap_or_else(|| "00:00:00:00:00:00".to_string());
    Sha256::digest(mac.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claude_body(value: Value) -> claude::MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn conversation_state_splits_history_and_current() {
        let body = claude_body(json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "second"},
                {"role": "user", "content": "third"}
            ]
        }));
        let payload =
            build_codewhisperer_request("claude-sonnet-4-5-20250929", &body, "social", None)
                .unwrap();
        let state = &payload["conversationState"];
        assert_eq!(state["chatTriggerType"], "MANUAL");
        assert!(!state["conversationId"].as_str().unwrap().is_empty());
        let history = state["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["userInputMessage"]["content"], "first");
        assert_eq!(
            history[0]["userInputMessage"]["modelId"],
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
        assert_eq!(history[0]["userInputMessage"]["origin"], "AI_EDITOR");
        assert_eq!(history[1]["assistantResponseMessage"]["content"], "second");
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "third"
        );
    }

    #[test]
    fn system_prompt_is_prepended_to_a_current_user_turn() {
        let body = claude_body(json!({
            "system": "act well",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let payload = build_codewhisperer_request("claude-sonnet-4-5-20250929", &body, "social", None)
            .unwrap();
        assert_eq!(
            payload["conversationState"]["currentMessage"]["userInputMessage"]["content"],
            "act well\n\nhi"
        );
    }

    #[test]
    fn profile_arn_rides_top_level_for_social_auth_only() {
        let body = claude_body(json!({"messages": [{"role": "user", "content": "hi"}]}));
        let payload = build_codewhisperer_request(
            "claude-sonnet-4-5-20250929",
            &body,
            "social",
            Some("arn:aws:codewhisperer:profile/x"),
        )
        .unwrap();
        assert_eq!(payload["profileArn"], "arn:aws:codewhisperer:profile/x");

        let payload = build_codewhisperer_request(
            "claude-sonnet-4-5-20250929",
            &body,
            "idc",
            Some("arn:aws:codewhisperer:profile/x"),
        )
        .unwrap();
        assert!(payload.get("profileArn").is_none());
    }

    #[test]
    fn unknown_models_fall_back_to_the_default_entry() {
        assert_eq!(
            codewhisperer_model("claude-sonnet-4-20250514"),
            "CLAUDE_SONNET_4_20250514_V1_0"
        );
        assert_eq!(
            codewhisperer_model("totally-unknown"),
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
    }

    #[test]
    fn empty_message_lists_are_rejected() {
        let body = claude_body(json!({"messages": []}));
        let err = build_codewhisperer_request("m", &body, "social", None).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidRequest(_)));
    }

    #[test]
    fn event_stream_content_is_concatenated_and_unescaped() {
        let raw = br#"garbage event{"content":"Hello "}more event{"content":"world\\nbye"}"#;
        assert_eq!(parse_event_stream_text(raw), "Hello world\nbye");
    }

    #[test]
    fn brace_matching_survives_nested_objects_and_escaped_quotes() {
        let raw = br#"x{"content":"a \"quoted {brace}\" b"}{"content":"c"}"#;
        assert_eq!(parse_event_stream_text(raw), "a \"quoted {brace}\" bc");
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let raw = br#"{"content":"done"}{"content":"trunc"#;
        assert_eq!(parse_event_stream_text(raw), "done");
    }

    #[test]
    fn simulated_stream_has_the_exact_event_order() {
        let events = simulated_stream_events("claude-sonnet-4-5-20250929", "full text");
        let kinds: Vec<&str> = events
            .iter()
            .map(|event| event.event_type().unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let claude::StreamEvent::ContentBlockDelta { delta, .. } = &events[2] else {
            panic!("third event should be the full-text delta");
        };
        assert_eq!(delta.text.as_deref(), Some("full text"));
        let claude::StreamEvent::MessageDelta { delta, usage } = &events[4] else {
            panic!("fifth event should be message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(usage.as_ref().unwrap().output_tokens, Some(2));
    }

    #[test]
    fn token_estimate_is_a_quarter_of_the_byte_length() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("12345678"), 2);
    }
}
