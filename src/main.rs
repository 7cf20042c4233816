//! `fetchzipd` — the fetchzip server binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use fetchzip::api;
use fetchzip::config::{self, LoggerConfig};
use fetchzip::loader::{Loader, build_outbound_client};
use fetchzip::manager::{Manager, ManagerConfig};
use fetchzip::store::{StoreConfig, TaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load().context("load config failed")?;
    init_tracing(&cfg.logger);
    debug!(?cfg, "server config");

    let client = build_outbound_client().context("build outbound client failed")?;
    let loader = Loader::new(client, cfg.loader.allow_mime.clone());
    let store = TaskStore::new(StoreConfig {
        max_total: cfg.manager.max_total,
        max_files: cfg.manager.max_files,
        task_ttl: cfg.manager.task_ttl,
    });
    let manager = Manager::new(
        ManagerConfig {
            max_active: cfg.manager.max_active,
            process_delay: cfg.manager.process_delay,
        },
        Arc::clone(&store),
        loader,
    );

    let app = api::router(manager);
    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .with_context(|| format!("bind {} failed", cfg.server.addr))?;

    info!(addr = %cfg.server.addr, "server startup");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    store.cancel();
    info!("server stopped");
    Ok(())
}

fn init_tracing(cfg: &LoggerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.plaintext {
        builder.init();
    } else {
        builder.json().init();
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("shutdown by interrupt"),
                _ = sigterm.recv() => info!("shutdown by SIGTERM"),
            }
        }
        Err(signal_error) => {
            warn!(error = %signal_error, "install SIGTERM handler failed");
            let _ = ctrl_c.await;
            info!("shutdown by interrupt");
        }
    }
}
