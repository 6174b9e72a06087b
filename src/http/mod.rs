//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, session id)
//!     → CONNECT: on_connect → tunnel
//!     → otherwise: on_request → upstream client → on_response
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
