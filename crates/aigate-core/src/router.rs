use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::require_api_key;
use crate::handler;
use crate::state::GatewayState;

/// The gateway route table. Every API route is also mounted under a
/// leading `/{provider}` segment so a path prefix can pick the backend for
/// a single request.
pub fn gateway_router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route("/health", get(handler::health))
        .route("/v1/models", get(handler::list_models))
        .route("/v1/chat/completions", post(handler::chat_completions))
        .route("/v1/messages", post(handler::claude_messages))
        .route("/v1beta/models", get(handler::list_models))
        .route("/v1beta/models/{model_action}", post(handler::gemini_generate));

    Router::new()
        .merge(api.clone())
        .nest("/{provider}", api)
        .fallback(handler::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-goog-api-key"),
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("model-provider"),
        ])
}
