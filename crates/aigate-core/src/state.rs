use std::sync::Arc;

use aigate_common::{Config, Provider};
use aigate_provider::pool::overlay_credentials;
use aigate_provider::{Adapter, AdapterError, AdapterRegistry, ProviderPoolManager};
use axum::http::HeaderMap;
use tracing::info;

use crate::error::ApiError;
use crate::prompt_log::PromptLogger;

pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<AdapterRegistry>,
    pub pool: Option<Arc<ProviderPoolManager>>,
    pub prompt_log: PromptLogger,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<AdapterRegistry>,
        pool: Option<Arc<ProviderPoolManager>>,
    ) -> Arc<Self> {
        let prompt_log = PromptLogger::from_config(&config);
        Arc::new(Self {
            config,
            registry,
            pool,
            prompt_log,
        })
    }

    /// Per-request configuration: a copy of the global config with the
    /// backend provider optionally overridden by the `Model-Provider`
    /// header or a leading path segment naming a provider.
    pub fn request_config(&self, headers: &HeaderMap, path: &str) -> Result<Config, ApiError> {
        let mut config = (*self.config).clone();

        if let Some(value) = headers.get("model-provider") {
            let value = value
                .to_str()
                .map_err(|_| ApiError::bad_request("invalid Model-Provider header"))?;
            let provider = Provider::parse(value).ok_or_else(|| {
                ApiError::bad_request(format!("unsupported provider: {value}"))
            })?;
            info!(provider = %provider, "model provider overridden by header");
            config.model_provider = provider;
        }

        let first_segment = path.trim_start_matches('/').split('/').next();
        if let Some(provider) = first_segment.and_then(Provider::parse) {
            info!(provider = %provider, "model provider overridden by path");
            config.model_provider = provider;
        }

        Ok(config)
    }

    /// Resolve the adapter for this request, overlaying pool credentials
    /// when the provider has a configured pool.
    pub async fn acquire_adapter(
        &self,
        config: &mut Config,
    ) -> Result<Arc<dyn Adapter>, ApiError> {
        if let Some(pool) = &self.pool {
            if let Some(selection) = pool.select(config.model_provider).await {
                config.pool_uuid = Some(selection.uuid.clone());
                overlay_credentials(config, &selection.credentials);
            }
        }
        self.registry
            .get_or_create(config)
            .await
            .map_err(ApiError::from)
    }

    /// Count a backend failure against the pool entry the request used.
    pub async fn note_backend_failure(&self, config: &Config, err: &AdapterError) {
        if !err.counts_against_credential() {
            return;
        }
        let (Some(pool), Some(uuid)) = (&self.pool, config.pool_uuid.as_deref()) else {
            return;
        };
        pool.mark_unhealthy(config.model_provider, uuid).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigate_common::ConfigPatch;
    use axum::http::HeaderValue;

    fn state() -> Arc<GatewayState> {
        GatewayState::new(
            Arc::new(ConfigPatch::default().into_config()),
            Arc::new(AdapterRegistry::new()),
            None,
        )
    }

    // Scenario S6: the header overrides the primary provider.
    #[test]
    fn header_overrides_the_backend_provider() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert("model-provider", HeaderValue::from_static("claude-custom"));
        let config = state
            .request_config(&headers, "/v1/chat/completions")
            .unwrap();
        assert_eq!(config.model_provider, Provider::ClaudeCustom);
    }

    #[test]
    fn leading_path_segment_overrides_the_backend_provider() {
        let state = state();
        let config = state
            .request_config(&HeaderMap::new(), "/openai-custom/v1/messages")
            .unwrap();
        assert_eq!(config.model_provider, Provider::OpenAICustom);
    }

    #[test]
    fn unknown_header_provider_is_a_client_error() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert("model-provider", HeaderValue::from_static("warp-drive"));
        let err = state
            .request_config(&headers, "/v1/chat/completions")
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn ordinary_paths_keep_the_primary_provider() {
        let state = state();
        let config = state
            .request_config(&HeaderMap::new(), "/v1/chat/completions")
            .unwrap();
        assert_eq!(config.model_provider, Provider::GeminiCliOauth);
    }
}
