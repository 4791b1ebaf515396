use std::sync::Arc;
use std::time::Instant;

use aigate_common::Protocol;
use aigate_protocol::{claude, gemini, openai};
use aigate_translate::{convert_request, convert_response, ProtocolRequest, ProtocolResponse};
use axum::extract::{OriginalUri, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::extract;
use crate::inject::apply_system_prompt;
use crate::state::GatewayState;
use crate::stream::streaming_response;

pub(crate) async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        "provider": state.config.model_provider.as_str(),
    }))
}

/// Model catalogue of the current backend, served for both the OpenAI and
/// the Gemini listing route as a pass-through.
pub(crate) async fn list_models(
    State(state): State<Arc<GatewayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let mut config = match state.request_config(&headers, uri.path()) {
        Ok(config) => config,
        Err(err) => return err.into_response(),
    };
    let adapter = match state.acquire_adapter(&mut config).await {
        Ok(adapter) => adapter,
        Err(err) => return err.into_response(),
    };
    match adapter.list_models().await {
        Ok(models) => Json(models).into_response(),
        Err(err) => {
            state.note_backend_failure(&config, &err).await;
            ApiError::from(err).into_response()
        }
    }
}

pub(crate) async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: openai::ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::bad_request(format!("invalid JSON in request body: {err}"))
                .into_response()
        }
    };
    let Some(model) = request.model.clone().filter(|model| !model.is_empty()) else {
        return ApiError::bad_request("model field is required").into_response();
    };
    let stream = request.stream == Some(true);
    handle_generate(
        state,
        headers,
        uri.path(),
        Protocol::OpenAI,
        ProtocolRequest::OpenAI(request),
        model,
        stream,
    )
    .await
}

pub(crate) async fn claude_messages(
    State(state): State<Arc<GatewayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: claude::MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::bad_request(format!("invalid JSON in request body: {err}"))
                .into_response()
        }
    };
    let Some(model) = request.model.clone().filter(|model| !model.is_empty()) else {
        return ApiError::bad_request("model field is required").into_response();
    };
    let stream = request.stream == Some(true);
    handle_generate(
        state,
        headers,
        uri.path(),
        Protocol::Claude,
        ProtocolRequest::Claude(request),
        model,
        stream,
    )
    .await
}

pub(crate) async fn gemini_generate(
    State(state): State<Arc<GatewayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, action)) = parse_model_action(uri.path()) else {
        return ApiError::not_found("Not Found").into_response();
    };
    let request: gemini::GenerateContentRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::bad_request(format!("invalid JSON in request body: {err}"))
                .into_response()
        }
    };
    let stream = action == "streamGenerateContent";
    handle_generate(
        state,
        headers,
        uri.path(),
        Protocol::Gemini,
        ProtocolRequest::Gemini(request),
        model,
        stream,
    )
    .await
}

pub(crate) async fn not_found() -> Response {
    ApiError::not_found("Not Found").into_response()
}

async fn handle_generate(
    state: Arc<GatewayState>,
    headers: HeaderMap,
    path: &str,
    client_protocol: Protocol,
    mut request: ProtocolRequest,
    model: String,
    stream: bool,
) -> Response {
    let started = Instant::now();
    let mut config = match state.request_config(&headers, path) {
        Ok(config) => config,
        Err(err) => return err.into_response(),
    };
    info!(
        event = "request_received",
        provider = %config.model_provider,
        client_proto = %client_protocol,
        model = %model,
        is_stream = stream,
        path,
    );

    if !config.system_prompt_content.is_empty() {
        apply_system_prompt(
            &mut request,
            &config.system_prompt_content,
            config.system_prompt_mode,
        );
    }
    state
        .prompt_log
        .log_input(&extract::request_text(&request))
        .await;

    let adapter = match state.acquire_adapter(&mut config).await {
        Ok(adapter) => adapter,
        Err(err) => return err.into_response(),
    };
    let backend_protocol = config.model_provider.protocol();
    let request = convert_request(request, backend_protocol);

    if stream {
        match adapter.generate_content_stream(&model, request).await {
            Ok(chunks) => {
                info!(
                    event = "request_responded",
                    provider = %config.model_provider,
                    model = %model,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    is_stream = true,
                );
                streaming_response(client_protocol, model, chunks, state.prompt_log.clone())
            }
            Err(err) => {
                warn!(
                    event = "request_failed",
                    provider = %config.model_provider,
                    model = %model,
                    error = %err,
                    is_stream = true,
                );
                state.note_backend_failure(&config, &err).await;
                ApiError::from(err).into_response()
            }
        }
    } else {
        match adapter.generate_content(&model, request).await {
            Ok(response) => {
                let response = convert_response(response, client_protocol, &model);
                state
                    .prompt_log
                    .log_output(&extract::response_text(&response))
                    .await;
                info!(
                    event = "request_responded",
                    provider = %config.model_provider,
                    model = %model,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    is_stream = false,
                );
                response_json(response)
            }
            Err(err) => {
                warn!(
                    event = "request_failed",
                    provider = %config.model_provider,
                    model = %model,
                    error = %err,
                    is_stream = false,
                );
                state.note_backend_failure(&config, &err).await;
                ApiError::from(err).into_response()
            }
        }
    }
}

fn response_json(response: ProtocolResponse) -> Response {
    let value = match &response {
        ProtocolResponse::OpenAI(resp) => serde_json::to_value(resp),
        ProtocolResponse::Claude(resp) => serde_json::to_value(resp),
        ProtocolResponse::Gemini(resp) => serde_json::to_value(resp),
    };
    match value {
        Ok(value) => Json(value).into_response(),
        Err(err) => ApiError::internal(err.to_string()).into_response(),
    }
}

/// Parse `…/v1beta/models/{model}:{action}` into its pieces.
fn parse_model_action(path: &str) -> Option<(String, String)> {
    let rest = path.split("/v1beta/models/").nth(1)?;
    let (model, action) = rest.split_once(':')?;
    if model.is_empty() {
        return None;
    }
    matches!(action, "generateContent" | "streamGenerateContent")
        .then(|| (model.to_string(), action.to_string()))
}
