//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the capture proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// What gets captured and how much of it.
    pub capture: CaptureConfig,

    /// Where capture records are written.
    pub storage: StorageConfig,

    /// Proxy authentication.
    pub auth: AuthConfig,

    /// Request rewrite rules.
    pub rewrite: RewriteConfig,

    /// Live observer feed.
    pub broadcast: BroadcastConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator API (record lookup, observer socket).
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Which exchanges get persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Nothing is written.
    None,
    /// Every authorized exchange is written.
    #[default]
    All,
    /// Only exchanges that reached at least one live observer.
    Broadcast,
}

/// Capture settings. Hot-reloadable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Persistence policy.
    pub save_mode: SaveMode,

    /// Bodies larger than this are stored as the skip sentinel.
    pub max_body_bytes: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            save_mode: SaveMode::All,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Record store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process map, lost on restart.
    Memory,
    /// One JSON document per record under `data_dir`.
    #[default]
    File,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Root directory for the file backend.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: "./data".to_string(),
        }
    }
}

/// Proxy authentication. An empty user list leaves the proxy open.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Realm announced in `Proxy-Authenticate`.
    pub realm: String,

    /// Accepted credentials.
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            realm: "capture-proxy".to_string(),
            users: Vec::new(),
        }
    }
}

/// A single proxy user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
}

/// Rewrite rules, evaluated in order; first match wins.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RewriteConfig {
    pub rules: Vec<RewriteRule>,
}

/// A single rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteRule {
    /// Rule identifier for logging.
    pub name: String,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Host to match (case-insensitive, port ignored). Any host when absent.
    #[serde(default)]
    pub host: Option<String>,

    /// Upstream authority to send matching requests to (e.g. "10.0.0.5:8080").
    #[serde(default)]
    pub upstream: Option<String>,

    /// Replacement for the matched path prefix.
    #[serde(default)]
    pub replace_prefix: Option<String>,

    /// Status returned by the hook. Anything but 200/304 rejects the request.
    #[serde(default)]
    pub status: Option<u16>,
}

/// Live broadcast settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Per-observer queue depth.
    pub queue_capacity: usize,

    /// How long a full observer queue may hold up a broadcast before the
    /// observer is dropped.
    pub send_timeout_ms: u64,

    /// Also announce CONNECT tunnels.
    pub connect_events: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            send_timeout_ms: 50,
            connect_events: true,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
