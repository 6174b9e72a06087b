//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: a store that cannot be opened is fatal
//! - Listeners are bound by the caller, after everything else is ready

use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::admin::{setup_admin_router, AdminState};
use crate::broadcast::BroadcastHub;
use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::intercept::Interceptor;
use crate::storage::{CaptureStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open capture store: {0}")]
    Storage(#[from] StoreError),
}

/// Everything needed to serve, not yet listening.
pub struct Proxy {
    pub server: HttpServer,
    pub interceptor: Arc<Interceptor>,
    /// `None` when the admin API is disabled.
    pub admin: Option<Router>,
}

/// Open the store and wire the pipeline.
pub async fn build(config: ProxyConfig) -> Result<Proxy, StartupError> {
    let store = CaptureStore::open(&config.storage).await?;
    tracing::info!(backend = ?config.storage.backend, data_dir = %config.storage.data_dir, "Capture store ready");

    let hub = Arc::new(BroadcastHub::new(&config.broadcast));
    let interceptor = Arc::new(Interceptor::from_config(&config, store, hub));

    let admin = config
        .admin
        .enabled
        .then(|| setup_admin_router(AdminState::new(interceptor.clone(), &config.admin.api_key)));

    Ok(Proxy {
        server: HttpServer::new(config, interceptor.clone()),
        interceptor,
        admin,
    })
}

/// Serve the admin router until `shutdown` fires.
pub async fn serve_admin(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
