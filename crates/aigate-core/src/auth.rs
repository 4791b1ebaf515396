use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::GatewayState;

/// API-key middleware. The health endpoint is exempt; everything else must
/// present the configured key in one of the accepted locations.
pub async fn require_api_key(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    if !is_authorized(
        request.headers(),
        request.uri().query(),
        &state.config.required_api_key,
    ) {
        return ApiError::unauthorized("Unauthorized: API key is invalid or missing.")
            .into_response();
    }
    next.run(request).await
}

/// Accepts `Authorization: Bearer`, `x-goog-api-key`, `x-api-key` or a
/// `?key=` query parameter.
pub fn is_authorized(headers: &HeaderMap, query: Option<&str>, required: &str) -> bool {
    if let Some(token) = bearer_token(headers) {
        if token == required {
            return true;
        }
    }
    for name in ["x-goog-api-key", "x-api-key"] {
        if header_value(headers, name).as_deref() == Some(required) {
            return true;
        }
    }
    query_value(query, "key").as_deref() == Some(required)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = header_value(headers, "authorization")?;
    auth.trim()
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn query_value(query: Option<&str>, key: &str) -> Option<String> {
    for pair in query?.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(key) {
            return Some(parts.next().unwrap_or_default().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn all_four_key_locations_are_accepted() {
        let key = "secret";
        assert!(is_authorized(
            &headers(&[("authorization", "Bearer secret")]),
            None,
            key
        ));
        assert!(is_authorized(&headers(&[("x-goog-api-key", "secret")]), None, key));
        assert!(is_authorized(&headers(&[("x-api-key", "secret")]), None, key));
        assert!(is_authorized(&headers(&[]), Some("alt=json&key=secret"), key));
    }

    #[test]
    fn wrong_or_missing_keys_are_rejected() {
        let key = "secret";
        assert!(!is_authorized(&headers(&[]), None, key));
        assert!(!is_authorized(
            &headers(&[("authorization", "Bearer nope")]),
            None,
            key
        ));
        assert!(!is_authorized(&headers(&[("x-api-key", "nope")]), None, key));
        assert!(!is_authorized(&headers(&[]), Some("key=nope"), key));
        // Bare token without the Bearer scheme does not count.
        assert!(!is_authorized(&headers(&[("authorization", "secret")]), None, key));
    }
}
