//! Live broadcast subsystem.
//!
//! # Data Flow
//! ```text
//! Interceptor (per request)
//!     → hub.rs broadcast(event)
//!     → one bounded queue per observer
//!     → observer.rs (WebSocket task) → dashboard
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: the proxy path never waits longer than the send timeout
//! - Stalled or closed observers are evicted, never allowed to backpressure
//! - FIFO per observer; no ordering across observers

pub mod hub;
pub mod observer;

pub use hub::{BroadcastEvent, BroadcastHub, ObserverId, Subscription};
