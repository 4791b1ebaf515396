use std::collections::HashMap;
use std::sync::Arc;

use aigate_common::{Config, Provider};
use tokio::sync::RwLock;
use tracing::info;

use crate::adapter::{Adapter, AdapterResult};
use crate::backends::{ClaudeAdapter, GeminiAdapter, KiroAdapter, OpenAIAdapter, QwenAdapter};

/// Process-wide adapter singletons keyed by `(provider, optional uuid)`.
///
/// The read lock is the fast path; construction happens under the write
/// lock with a double check, so concurrent callers observe at most one
/// instance per key and share its authentication state.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, config: &Config) -> AdapterResult<Arc<dyn Adapter>> {
        let key = registry_key(config);
        if let Some(adapter) = self.adapters.read().await.get(&key) {
            return Ok(adapter.clone());
        }

        let mut guard = self.adapters.write().await;
        if let Some(adapter) = guard.get(&key) {
            return Ok(adapter.clone());
        }
        let adapter = build_adapter(config).await?;
        guard.insert(key.clone(), adapter.clone());
        info!(provider = %config.model_provider, key = %key, "created adapter");
        Ok(adapter)
    }

    /// A snapshot of every live adapter, for the refresh cron.
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn Adapter>)> {
        self.adapters
            .read()
            .await
            .iter()
            .map(|(key, adapter)| (key.clone(), adapter.clone()))
            .collect()
    }
}

fn registry_key(config: &Config) -> String {
    match config.pool_uuid.as_deref().filter(|uuid| !uuid.is_empty()) {
        Some(uuid) => format!("{}{}", config.model_provider, uuid),
        None => config.model_provider.to_string(),
    }
}

async fn build_adapter(config: &Config) -> AdapterResult<Arc<dyn Adapter>> {
    Ok(match config.model_provider {
        Provider::OpenAICustom => Arc::new(OpenAIAdapter::new(config)?),
        Provider::ClaudeCustom => Arc::new(ClaudeAdapter::new(config)?),
        Provider::GeminiCliOauth => Arc::new(GeminiAdapter::new(config)?),
        Provider::ClaudeKiroOauth => Arc::new(KiroAdapter::new(config).await?),
        Provider::OpenAIQwenOauth => Arc::new(QwenAdapter::new(config)?),
    })
}
