//! Structured logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and `tower_http`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
pub fn init(log_level: &str) {
    let fallback = format!("capture_proxy={log_level},tower_http={log_level}");
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
