//! Capture proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    CAPTURE PROXY                      │
//!                    │                                                       │
//!   Client request   │  ┌─────────┐   ┌────────────┐   ┌──────────────┐     │
//!  ──────────────────┼─▶│  http   │──▶│ intercept  │──▶│ upstream     │─────┼──▶ Origin
//!                    │  │ server  │   │ on_request │   │ client       │     │
//!                    │  └─────────┘   └─────┬──────┘   └──────┬───────┘     │
//!                    │                      │                 │             │
//!   Client response  │                      ▼                 ▼             │
//!  ◀─────────────────┼──────────────  on_response ◀───────────┘             │
//!                    │                      │                               │
//!                    │          ┌───────────┼────────────┐                  │
//!                    │          ▼           ▼            ▼                  │
//!                    │     ┌─────────┐ ┌─────────┐ ┌───────────┐            │
//!                    │     │ capture │ │ storage │ │ broadcast │──── /ws ───┼──▶ Dashboards
//!                    │     │ records │ │ tables  │ │    hub    │            │
//!                    │     └─────────┘ └────┬────┘ └───────────┘            │
//!                    │                      │                               │
//!                    │                 admin API ───────────────────────────┼──▶ Operators
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use capture_proxy::config::loader::load_config;
use capture_proxy::config::watcher::ConfigWatcher;
use capture_proxy::config::ProxyConfig;
use capture_proxy::lifecycle::{signals, startup, Shutdown};
use capture_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "capture-proxy", version, about = "Intercepting HTTP proxy with live capture")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload capture settings when the configuration file changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!("capture-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        save_mode = ?config.capture.save_mode,
        max_body_bytes = config.capture.max_body_bytes,
        users = config.auth.users.len(),
        rewrite_rules = config.rewrite.rules.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (config_updates, _watcher) = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (rx, Some(watcher.run()?))
        }
        _ => {
            let (_, rx) = mpsc::unbounded_channel();
            (rx, None)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let admin_listener = if config.admin.enabled {
        Some(TcpListener::bind(&config.admin.bind_address).await?)
    } else {
        None
    };

    let proxy = startup::build(config).await?;
    let shutdown = Shutdown::new();

    if let (Some(listener), Some(router)) = (admin_listener, proxy.admin) {
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = startup::serve_admin(listener, router, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signals::shutdown_signal().await;
        signal_shutdown.trigger();
    });

    proxy
        .server
        .run(listener, config_updates, shutdown.subscribe())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
