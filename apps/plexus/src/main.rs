mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plexus_config::{ConfigHandle, ConfigSnapshot};
use plexus_core::{Engine, EngineOptions, UpstreamClientConfig, WreqUpstreamClient};
use plexus_server::build_router;
use plexus_storage::FileStore;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.into_settings()?;

    let raw = std::fs::read_to_string(&settings.config_path)
        .with_context(|| format!("reading config {}", settings.config_path.display()))?;
    let snapshot = ConfigSnapshot::from_yaml(&raw).context("parsing config")?;
    info!(
        event = "config_loaded",
        providers = snapshot.providers.len(),
        aliases = snapshot.models.len()
    );
    let config = ConfigHandle::new(snapshot);

    std::fs::create_dir_all(&settings.state_dir)
        .with_context(|| format!("creating state dir {}", settings.state_dir.display()))?;
    let store = Arc::new(FileStore::new(&settings.state_dir));

    let client = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig::default())
            .context("building upstream client")?,
    );

    let engine = Arc::new(
        Engine::new(
            config,
            client,
            EngineOptions {
                cooldown_store: Some(store.clone()),
                usage_store: Some(store),
                ..Default::default()
            },
        )
        .await,
    );

    let router = build_router(engine);
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(event = "listening", addr = %addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(event = "shutdown_requested");
        })
        .await
        .context("serving")?;
    Ok(())
}
