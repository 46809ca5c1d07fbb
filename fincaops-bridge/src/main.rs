//! fincaops-bridge - incident reconciliation service
//!
//! Serves the operator console's merged view over the agent ingestion store
//! and the registry, and runs the promotion protocol between them.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fincaops_common::events::EventBus;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fincaops_bridge::attachments::AttachmentMigrator;
use fincaops_bridge::config::{BridgeConfig, CliArgs};
use fincaops_bridge::directory::DirectoryCache;
use fincaops_bridge::live_view::DualSourceLiveView;
use fincaops_bridge::transfer::TransferCoordinator;
use fincaops_bridge::{build_router, db, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting FincaOps Bridge (fincaops-bridge) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cli = CliArgs::parse();
    let config = BridgeConfig::resolve(&cli)?;
    info!("Registry database: {}", config.registry_db.display());
    info!("Agent database: {}", config.agent_db.display());
    info!("Agent table: {}", config.agent_table);

    let registry = db::init_registry_pool(&config.registry_db).await?;
    info!("✓ Registry connected");
    let agent = db::init_agent_pool(&config.agent_db).await?;
    info!("✓ Agent store connected (read/write, no schema assumed)");

    let event_bus = EventBus::new(256);
    let cancel = CancellationToken::new();

    let directory = Arc::new(DirectoryCache::new(
        registry.clone(),
        event_bus.clone(),
        config.directory_refresh_timeout,
    ));
    if let Err(e) = directory.refresh().await {
        // The cache serves empty until the registry comes back; promotions
        // are refused in the meantime
        warn!("Initial directory refresh failed: {}", e);
    }
    directory
        .clone()
        .spawn_refresh_task(config.directory_refresh_interval, cancel.clone());

    let live_view = Arc::new(DualSourceLiveView::new(
        registry.clone(),
        agent.clone(),
        config.agent_table.clone(),
        directory.clone(),
        event_bus.clone(),
        config.poll_interval,
    ));
    live_view.spawn_watchers(cancel.clone());

    let migrator = AttachmentMigrator::new(
        config.agent_attachments_dir.clone(),
        config.registry_attachments_dir.clone(),
    );
    let transfer = Arc::new(TransferCoordinator::new(
        registry.clone(),
        agent.clone(),
        config.agent_table.clone(),
        directory.clone(),
        migrator,
        event_bus.clone(),
    ));

    let state = AppState {
        registry,
        agent,
        agent_table: config.agent_table.clone(),
        event_bus,
        directory,
        live_view,
        transfer,
        started_at: chrono::Utc::now(),
    };
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("fincaops-bridge listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    info!("fincaops-bridge stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, stopping watchers");
    cancel.cancel();
}
