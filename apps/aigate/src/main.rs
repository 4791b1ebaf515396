use std::sync::Arc;
use std::time::Duration;

use aigate_common::{Config, ConfigPatch, Provider};
use aigate_core::{gateway_router, spawn_token_refresh, GatewayState};
use aigate_provider::{AdapterRegistry, ProviderPoolManager};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut patch = match ConfigPatch::from_config_json("config.json")? {
        Some(patch) => {
            info!("loaded configuration from config.json");
            patch
        }
        None => ConfigPatch::default(),
    };
    patch.overlay(args.into_patch());
    let config = Arc::new(patch.into_config());
    log_config(&config);

    let registry = Arc::new(AdapterRegistry::new());

    let pool = match &config.provider_pools_file {
        Some(path) => match ProviderPoolManager::load(path) {
            Ok(pool) => {
                info!(path = %path, "provider pool manager initialized");
                pool.perform_health_checks(registry.clone(), config.clone())
                    .await;
                Some(pool)
            }
            Err(err) => {
                warn!(path = %path, error = %err, "failed to initialize provider pool manager");
                None
            }
        },
        None => None,
    };

    // Warm up an adapter per configured provider so credential problems
    // surface at startup instead of on the first request.
    for provider in &config.default_providers {
        let mut provider_config = (*config).clone();
        provider_config.model_provider = *provider;
        info!(provider = %provider, "initializing adapter");
        if let Err(err) = registry.get_or_create(&provider_config).await {
            warn!(provider = %provider, error = %err, "failed to initialize adapter");
        }
    }

    let state = GatewayState::new(config.clone(), registry, pool);
    if config.cron_refresh_token {
        spawn_token_refresh(state.clone());
    }

    let app = gateway_router(state);
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("listening on http://{bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");

    // Cap the drain; in-flight requests get 30 seconds, then the process
    // exits regardless.
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        warn!("graceful shutdown timed out, aborting");
        std::process::exit(1);
    });
}

fn log_config(config: &Config) {
    info!("--- aigate configuration ---");
    info!("  primary provider: {}", config.model_provider);
    if config.default_providers.len() > 1 {
        let extra: Vec<&str> = config.default_providers[1..]
            .iter()
            .map(Provider::as_str)
            .collect();
        info!("  additional providers: {}", extra.join(", "));
    }
    for provider in &config.default_providers {
        log_provider(config, *provider);
    }
    info!("  host: {}", config.host);
    info!("  port: {}", config.port);
    info!("  required api key: {}", mask(&config.required_api_key));
    info!("  system prompt file: {}", config.system_prompt_file);
    info!("  system prompt mode: {:?}", config.system_prompt_mode);
    info!("  prompt logging: {:?}", config.prompt_log_mode);
    if config.cron_refresh_token {
        info!("  token refresh interval: {}m", config.cron_near_minutes);
    }
    if let Some(path) = &config.provider_pools_file {
        info!("  provider pools file: {path}");
    }
    info!("----------------------------");
}

fn log_provider(config: &Config, provider: Provider) {
    match provider {
        Provider::OpenAICustom => {
            info!(
                "  [{provider}] api key: {}",
                option_mask(config.openai_api_key.as_deref())
            );
            info!(
                "  [{provider}] base url: {}",
                config.openai_base_url.as_deref().unwrap_or("default")
            );
        }
        Provider::ClaudeCustom => {
            info!(
                "  [{provider}] api key: {}",
                option_mask(config.claude_api_key.as_deref())
            );
            info!(
                "  [{provider}] base url: {}",
                config.claude_base_url.as_deref().unwrap_or("default")
            );
        }
        Provider::GeminiCliOauth => {
            let source = if config.gemini_oauth_creds_base64.is_some() {
                "base64"
            } else if config.gemini_oauth_creds_file.is_some() {
                "file"
            } else {
                "default discovery"
            };
            info!("  [{provider}] oauth creds: {source}");
            info!(
                "  [{provider}] project id: {}",
                config.project_id.as_deref().unwrap_or("auto-discovered")
            );
        }
        Provider::ClaudeKiroOauth => {
            let source = if config.kiro_oauth_creds_base64.is_some() {
                "base64"
            } else if config.kiro_oauth_creds_file.is_some() {
                "file"
            } else {
                "default discovery"
            };
            info!("  [{provider}] oauth creds: {source}");
        }
        Provider::OpenAIQwenOauth => {
            info!(
                "  [{provider}] oauth creds file: {}",
                config.qwen_oauth_creds_file.as_deref().unwrap_or("default")
            );
        }
    }
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        "not set".to_string()
    } else {
        "******".to_string()
    }
}

fn option_mask(value: Option<&str>) -> String {
    match value {
        Some(value) => mask(value),
        None => "not set".to_string(),
    }
}
