//! Diary API Server
//!
//! REST API server for the daily diary.

use anyhow::Context;
use diary_api::{create_router, state::AppState};
use diary_core::config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("DIARY_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .with_context(|| format!("Failed to load config file {path}"))?
            .with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("diary_api={0},diary_core={0},tower_http=debug", config.logging.level).into()
    });

    if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing or identical secrets are fatal before anything starts
    let config = load_config()?;
    init_tracing(&config);

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(
        AppState::from_config(config)
            .await
            .context("Failed to initialize storage")?,
    );
    if let Some(limiter) = &state.rate_limiter {
        limiter.spawn_cleanup();
    }

    // Create router
    let app = create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Diary API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
        state.set_ready(false);
        tracing::info!("Shutting down");
    })
    .await?;

    Ok(())
}
