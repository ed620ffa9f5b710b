//! Server entry point.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use vesper_llm::ModelManager;
use vesper_server::{app, build_agent};

/// Default bind address.
const DEFAULT_BIND: &str = "127.0.0.1:8900";

/// Default data directory.
const DEFAULT_DATA_DIR: &str = "data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_root =
        std::env::var("DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND.to_string());

    let models = Arc::new(ModelManager::from_env().context("loading model profiles")?);
    let agent = build_agent(&data_root, models);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, data_root, "vesper server listening");

    axum::serve(listener, app(agent))
        .await
        .context("server error")?;
    Ok(())
}
