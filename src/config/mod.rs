//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps the capture settings (ArcSwap)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Only `[capture]` is hot-reloadable; auth and rewrite are fixed at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, AuthConfig, BroadcastConfig, CaptureConfig, ListenerConfig,
    ObservabilityConfig, ProxyConfig, RewriteConfig, RewriteRule, SaveMode, StorageBackend,
    StorageConfig, UserConfig,
};
