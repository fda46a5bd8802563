use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use genflow_api::app::{build_app, services::AppServices};
use genflow_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    genflow_observability::init();

    let config = AppConfig::from_env()?;
    let services = Arc::new(AppServices::build(&config)?);

    if let Some(name) = &config.bootstrap_tenant {
        let (tenant, raw_key) = services.bootstrap_tenant(name)?;
        // Printed once; only the hash is kept.
        warn!(
            tenant_id = %tenant.id,
            api_key = %raw_key,
            "bootstrap tenant key issued, store it now"
        );
    }

    let workers = config
        .mode
        .runs_workers()
        .then(|| services.spawn_workers(&config));
    let bridge = services.spawn_bridge()?;

    if config.mode.serves_http() {
        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        info!(addr = %listener.local_addr()?, mode = ?config.mode, "listening");

        axum::serve(listener, build_app(services.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("http server failed")?;
    } else {
        info!(mode = ?config.mode, "running without http listener");
        shutdown_signal().await;
    }

    if let Some(workers) = workers {
        let stats = workers.shutdown().await;
        info!(?stats, "workers stopped");
    }
    if let Some(bridge) = bridge {
        let forwarded = bridge.stop().await;
        info!(forwarded, "update bridge stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
