//! Interception subsystem.
//!
//! # Data Flow
//! ```text
//! Engine (http::server)
//!     → on_connect   CONNECT tunnel about to open
//!     → on_request   strip proxy headers → auth → docid → form decode
//!                    → rewrite → broadcast → forward or respond
//!                    → persist request record (save policy)
//!     → on_response  persist response record (docid != 0)
//! ```
//!
//! # Design Decisions
//! - The engine only knows the `InterceptHooks` capability, never the pipeline
//! - The context travels with the exchange by value; no shared per-request state

pub mod auth;
pub mod context;
pub mod orchestrator;
pub mod rewrite;

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

pub use auth::{Authenticator, BasicAuthenticator};
pub use context::{Identity, RequestContext};
pub use orchestrator::Interceptor;
pub use rewrite::{Rewriter, RuleRewriter};

/// Per-exchange facts supplied by the engine.
#[derive(Debug, Clone, Copy)]
pub struct Exchange {
    /// Engine-issued session identifier.
    pub session_id: i64,
    /// Client address.
    pub remote_addr: SocketAddr,
}

/// What the engine should do with an intercepted request.
pub enum RequestAction {
    /// Forward upstream, then hand the response to `on_response` with `ctx`.
    Forward {
        request: Request<Body>,
        ctx: RequestContext,
    },
    /// Answer the client directly. With a context, the response still goes
    /// through `on_response`.
    Respond {
        response: Response<Body>,
        ctx: Option<RequestContext>,
    },
}

/// Verdict for a CONNECT tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAction {
    Accept,
    Reject,
}

/// Hook points an interception engine calls into.
#[async_trait]
pub trait InterceptHooks: Send + Sync {
    /// A CONNECT tunnel to `host` is being established.
    async fn on_connect(&self, host: &str, exchange: Exchange) -> ConnectAction;

    /// A plain HTTP request arrived.
    async fn on_request(&self, request: Request<Body>, exchange: Exchange) -> RequestAction;

    /// A response is about to be returned to the client. Either side may be
    /// missing (upstream failure, unauthorized request).
    async fn on_response(
        &self,
        response: Option<Response<Body>>,
        ctx: Option<RequestContext>,
    ) -> Option<Response<Body>>;
}
