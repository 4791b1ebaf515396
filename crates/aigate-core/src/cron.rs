use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::GatewayState;

/// Background refresh loop: every `cron_near_minutes` the pool entries are
/// probed and every live adapter is asked to refresh its credential.
/// Failures are logged and never fatal; the task dies with the process.
pub fn spawn_token_refresh(state: Arc<GatewayState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.config.cron_near_minutes * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; skip it so the
        // startup probe (already run by bootstrap) is not doubled.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!(event = "cron_tick", "token refresh heartbeat");

            if let Some(pool) = &state.pool {
                pool.perform_health_checks(state.registry.clone(), state.config.clone())
                    .await;
            }

            for (key, adapter) in state.registry.snapshot().await {
                match adapter.refresh_token().await {
                    Ok(()) => debug!(adapter = %key, "token refresh ok"),
                    Err(err) => warn!(adapter = %key, error = %err, "token refresh failed"),
                }
            }
        }
    })
}
