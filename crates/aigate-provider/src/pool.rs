//! Credential pool manager: weighted round-robin over equivalent backend
//! credentials with health accounting and a durable JSON state file.
//!
//! Every mutation schedules a write of the full pools file through a single
//! writer task with a one-slot mailbox; the writer snapshots the latest
//! state at write time and replaces the file atomically, so a slow write
//! can never be overtaken by an earlier one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use aigate_common::{Config, Provider};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::registry::AdapterRegistry;

pub const MAX_ERROR_COUNT: u32 = 3;
pub const HEALTH_CHECK_INTERVAL: time::Duration = time::Duration::minutes(30);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to read pools file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse pools file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// One credential set within a provider pool.
///
/// The credential fields themselves stay opaque (flattened map); the
/// manager reads and writes only its own bookkeeping fields around them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "isHealthy", default = "default_true")]
    pub is_healthy: bool,
    #[serde(
        rename = "lastUsed",
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_used: Option<OffsetDateTime>,
    #[serde(rename = "usageCount", default)]
    pub usage_count: u64,
    #[serde(rename = "errorCount", default)]
    pub error_count: u32,
    #[serde(
        rename = "lastErrorTime",
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_error_time: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub credentials: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// The credential set handed back by a successful selection.
#[derive(Debug, Clone)]
pub struct PoolSelection {
    pub uuid: String,
    pub credentials: Map<String, Value>,
}

#[derive(Debug, Default)]
struct PoolState {
    pools: HashMap<String, Vec<PoolEntry>>,
    cursors: HashMap<String, usize>,
}

pub struct ProviderPoolManager {
    state: RwLock<PoolState>,
    path: PathBuf,
    max_error_count: u32,
    health_check_interval: time::Duration,
    persist_tx: mpsc::Sender<()>,
}

impl ProviderPoolManager {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Arc<Self>, PoolError> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path).map_err(|source| PoolError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let pools: HashMap<String, Vec<PoolEntry>> =
            serde_json::from_slice(&data).map_err(|source| PoolError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let (persist_tx, persist_rx) = mpsc::channel(1);
        let manager = Arc::new(Self {
            state: RwLock::new(PoolState {
                pools,
                cursors: HashMap::new(),
            }),
            path,
            max_error_count: MAX_ERROR_COUNT,
            health_check_interval: HEALTH_CHECK_INTERVAL,
            persist_tx,
        });
        spawn_writer(Arc::downgrade(&manager), persist_rx);
        info!("provider pool manager initialized");
        Ok(manager)
    }

    /// Round-robin over the provider's healthy entries; stamps usage and
    /// schedules persistence. `None` when the pool is absent or exhausted.
    pub async fn select(&self, provider: Provider) -> Option<PoolSelection> {
        let mut state = self.state.write().await;
        let key = provider.as_str().to_string();
        let entries = match state.pools.get(&key) {
            Some(entries) if !entries.is_empty() => entries,
            _ => {
                debug!(provider = %provider, "no pool entries for provider");
                return None;
            }
        };
        let healthy: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_healthy)
            .map(|(idx, _)| idx)
            .collect();
        if healthy.is_empty() {
            warn!(provider = %provider, "no healthy pool entries for provider");
            return None;
        }

        let cursor = state.cursors.get(&key).copied().unwrap_or(0);
        let selected = healthy[cursor % healthy.len()];
        state.cursors.insert(key.clone(), (cursor + 1) % healthy.len());

        let entries = state.pools.get_mut(&key).expect("pool just read");
        let entry = &mut entries[selected];
        entry.last_used = Some(OffsetDateTime::now_utc());
        entry.usage_count += 1;
        let selection = PoolSelection {
            uuid: entry.uuid.clone(),
            credentials: entry.credentials.clone(),
        };
        debug!(
            provider = %provider,
            uuid = %selection.uuid,
            usage = entry.usage_count,
            "selected pool entry"
        );
        drop(state);

        self.schedule_persist();
        Some(selection)
    }

    /// Count one failure; the entry goes unhealthy at `max_error_count`.
    pub async fn mark_unhealthy(&self, provider: Provider, uuid: &str) {
        {
            let mut state = self.state.write().await;
            let Some(entry) = find_entry(&mut state, provider, uuid) else {
                return;
            };
            entry.error_count += 1;
            entry.last_error_time = Some(OffsetDateTime::now_utc());
            if entry.error_count >= self.max_error_count {
                entry.is_healthy = false;
                warn!(uuid, errors = entry.error_count, "pool entry marked unhealthy");
            } else {
                debug!(
                    uuid,
                    errors = entry.error_count,
                    max = self.max_error_count,
                    "pool entry error recorded"
                );
            }
        }
        self.schedule_persist();
    }

    pub async fn mark_healthy(&self, provider: Provider, uuid: &str) {
        {
            let mut state = self.state.write().await;
            let Some(entry) = find_entry(&mut state, provider, uuid) else {
                return;
            };
            entry.is_healthy = true;
            entry.error_count = 0;
            entry.last_error_time = None;
            debug!(uuid, "pool entry marked healthy");
        }
        self.schedule_persist();
    }

    /// Probe every entry by building an adapter from its credentials and
    /// listing models. Probes run concurrently on a state snapshot; the
    /// mark routines re-acquire the lock, so no lock is held across I/O.
    /// Unhealthy entries that failed recently are left to cool off.
    pub async fn perform_health_checks(
        self: &Arc<Self>,
        registry: Arc<AdapterRegistry>,
        base_config: Arc<Config>,
    ) {
        info!("performing provider pool health checks");
        let snapshot: Vec<(String, PoolEntry)> = {
            let state = self.state.read().await;
            state
                .pools
                .iter()
                .flat_map(|(provider, entries)| {
                    entries
                        .iter()
                        .map(|entry| (provider.clone(), entry.clone()))
                })
                .collect()
        };

        for (provider_id, entry) in snapshot {
            let Some(provider) = Provider::parse(&provider_id) else {
                warn!(provider = %provider_id, "unknown provider in pools file");
                continue;
            };
            if !entry.is_healthy {
                let recent_error = entry
                    .last_error_time
                    .map(|at| OffsetDateTime::now_utc() - at < self.health_check_interval)
                    .unwrap_or(false);
                if recent_error {
                    debug!(uuid = %entry.uuid, "skipping probe, last error too recent");
                    continue;
                }
            }

            let manager = self.clone();
            let registry = registry.clone();
            let config = entry_config(&base_config, provider, &entry);
            tokio::spawn(async move {
                let uuid = config.pool_uuid.clone().unwrap_or_default();
                let outcome = match registry.get_or_create(&config).await {
                    Ok(adapter) => adapter.list_models().await.map(|_| ()),
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(()) => {
                        debug!(uuid = %uuid, provider = %provider, "health check passed");
                        manager.mark_healthy(provider, &uuid).await;
                    }
                    Err(err) => {
                        warn!(uuid = %uuid, provider = %provider, error = %err, "health check failed");
                        manager.mark_unhealthy(provider, &uuid).await;
                    }
                }
            });
        }
    }

    fn schedule_persist(&self) {
        // A full mailbox means a write is already pending; it will pick up
        // this mutation when it snapshots.
        let _ = self.persist_tx.try_send(());
    }

    async fn snapshot_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let state = self.state.read().await;
        serde_json::to_vec_pretty(&state.pools)
    }
}

fn find_entry<'a>(
    state: &'a mut PoolState,
    provider: Provider,
    uuid: &str,
) -> Option<&'a mut PoolEntry> {
    state
        .pools
        .get_mut(provider.as_str())?
        .iter_mut()
        .find(|entry| entry.uuid == uuid)
}

fn spawn_writer(manager: std::sync::Weak<ProviderPoolManager>, mut rx: mpsc::Receiver<()>) {
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            let data = match manager.snapshot_json().await {
                Ok(data) => data,
                Err(err) => {
                    warn!(error = %err, "failed to serialize pools state");
                    continue;
                }
            };
            if let Err(err) = write_atomic(&manager.path, &data).await {
                warn!(error = %err, "failed to persist pools file");
            }
        }
    });
}

async fn write_atomic(path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Build the adapter config for a pool entry: the base config with the
/// entry's credential fields overlaid and the entry uuid attached.
pub fn entry_config(base: &Config, provider: Provider, entry: &PoolEntry) -> Config {
    let mut config = base.clone();
    config.model_provider = provider;
    config.pool_uuid = Some(entry.uuid.clone());
    overlay_credentials(&mut config, &entry.credentials);
    config
}

/// Map the recognised credential keys of a pool entry onto the config.
pub fn overlay_credentials(config: &mut Config, credentials: &Map<String, Value>) {
    let get = |key: &str| {
        credentials
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    };
    if let Some(value) = get("OPENAI_API_KEY") {
        config.openai_api_key = Some(value);
    }
    if let Some(value) = get("OPENAI_BASE_URL") {
        config.openai_base_url = Some(value);
    }
    if let Some(value) = get("CLAUDE_API_KEY") {
        config.claude_api_key = Some(value);
    }
    if let Some(value) = get("CLAUDE_BASE_URL") {
        config.claude_base_url = Some(value);
    }
    if let Some(value) = get("GEMINI_OAUTH_CREDS_BASE64") {
        config.gemini_oauth_creds_base64 = Some(value);
    }
    if let Some(value) = get("GEMINI_OAUTH_CREDS_FILE_PATH") {
        config.gemini_oauth_creds_file = Some(value);
    }
    if let Some(value) = get("KIRO_OAUTH_CREDS_BASE64") {
        config.kiro_oauth_creds_base64 = Some(value);
    }
    if let Some(value) = get("KIRO_OAUTH_CREDS_FILE_PATH") {
        config.kiro_oauth_creds_file = Some(value);
    }
    if let Some(value) = get("QWEN_OAUTH_CREDS_FILE_PATH") {
        config.qwen_oauth_creds_file = Some(value);
    }
    if let Some(value) = get("PROJECT_ID") {
        config.project_id = Some(value);
    }
}
