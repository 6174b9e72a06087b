//! Capture proxy library.
//!
//! An intercepting HTTP proxy that records every exchange it forwards,
//! correlates request and response under one document id, and pushes a live
//! notification per request to connected dashboards.

pub mod admin;
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod http;
pub mod intercept;
pub mod lifecycle;
pub mod observability;
pub mod storage;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use intercept::Interceptor;
pub use lifecycle::Shutdown;
