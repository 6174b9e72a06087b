//! The capture pipeline behind the interception hooks.
//!
//! # Terminal states
//! - `authorized-forwarded`: forwarded upstream, response captured
//! - `unauthorized-rejected`: 407, nothing allocated or written
//! - `rewrite-rejected`: rewrite status returned, request recorded with
//!   message "rewrite", synthesized response captured
//!
//! The request record is written before `on_request` returns, so it always
//! precedes the response record of the same exchange.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, request, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};

use crate::broadcast::{BroadcastEvent, BroadcastHub};
use crate::capture::body::{
    capture, declared_length, decode_for_storage, decode_form, is_form, is_gzip, Captured,
};
use crate::capture::dump::BodySnapshot;
use crate::capture::policy::should_persist;
use crate::capture::record::{absolute_url, build_request_record, build_response_record, request_host};
use crate::capture::{DocumentId, DocumentIdAllocator, RequestRecord, ResponseRecord};
use crate::config::{CaptureConfig, ProxyConfig, SaveMode};
use crate::intercept::auth::{proxy_auth_required, Authenticator, BasicAuthenticator};
use crate::intercept::context::RequestContext;
use crate::intercept::rewrite::{Rewriter, RuleRewriter};
use crate::intercept::{ConnectAction, Exchange, InterceptHooks, RequestAction};
use crate::observability::metrics;
use crate::storage::{CaptureStore, StoreResult};

/// Marks a replayed request. Stripped before forwarding.
pub const REPLAY_HEADER: &str = "x-capture-replay";

/// Body of a rewrite-rejected response.
pub const REWRITE_ERROR_BODY: &str = "pproxy error";

/// Capture settings shared with the config reload loop.
pub type CaptureSettings = Arc<ArcSwap<CaptureConfig>>;

/// Wires body capture, correlation, records, storage and broadcast into the
/// engine's hook points.
pub struct Interceptor {
    settings: CaptureSettings,
    store: CaptureStore,
    hub: Arc<BroadcastHub>,
    ids: Arc<DocumentIdAllocator>,
    auth: Arc<dyn Authenticator>,
    rewriter: Arc<dyn Rewriter>,
    connect_events: bool,
}

impl Interceptor {
    pub fn new(
        settings: CaptureSettings,
        store: CaptureStore,
        hub: Arc<BroadcastHub>,
        ids: Arc<DocumentIdAllocator>,
        auth: Arc<dyn Authenticator>,
        rewriter: Arc<dyn Rewriter>,
    ) -> Self {
        Self {
            settings,
            store,
            hub,
            ids,
            auth,
            rewriter,
            connect_events: true,
        }
    }

    /// Build with the config-driven authenticator and rewriter.
    pub fn from_config(config: &ProxyConfig, store: CaptureStore, hub: Arc<BroadcastHub>) -> Self {
        let mut interceptor = Self::new(
            Arc::new(ArcSwap::from_pointee(config.capture.clone())),
            store,
            hub,
            Arc::new(DocumentIdAllocator::new()),
            Arc::new(BasicAuthenticator::from_config(&config.auth)),
            Arc::new(RuleRewriter::from_config(&config.rewrite)),
        );
        interceptor.connect_events = config.broadcast.connect_events;
        interceptor
    }

    pub fn with_connect_events(mut self, enabled: bool) -> Self {
        self.connect_events = enabled;
        self
    }

    /// Swap in new capture settings. In-flight exchanges keep the old ones.
    pub fn apply_capture_config(&self, config: CaptureConfig) {
        tracing::info!(save_mode = ?config.save_mode, max_body_bytes = config.max_body_bytes, "Capture settings updated");
        self.settings.store(Arc::new(config));
    }

    pub fn capture_config(&self) -> Arc<CaptureConfig> {
        self.settings.load_full()
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.auth
    }

    /// Operator read path.
    pub async fn request_by_document_id(&self, id: DocumentId) -> StoreResult<RequestRecord> {
        self.store.request(id).await
    }

    /// Operator read path.
    pub async fn response_by_document_id(&self, id: DocumentId) -> StoreResult<ResponseRecord> {
        self.store.response(id).await
    }

    async fn capture_request_body(
        &self,
        request: &mut Request<Body>,
        limit: u64,
        ctx: &mut RequestContext,
    ) -> BodySnapshot {
        if declared_length(request.headers()).is_some_and(|n| n > limit) {
            metrics::record_body_skipped();
            return BodySnapshot::Skipped;
        }

        let snapshot = match capture(request.body_mut(), to_usize(limit)).await {
            Ok(Captured::Complete(bytes)) => BodySnapshot::Bytes(bytes),
            Ok(Captured::Oversized) => {
                metrics::record_body_skipped();
                BodySnapshot::Skipped
            }
            Err(e) => {
                tracing::warn!(docid = %ctx.document_id, error = %e, "Request body capture failed");
                ctx.note("body", &e);
                BodySnapshot::Failed(e.to_string())
            }
        };

        if is_form(request.headers()) {
            match &snapshot {
                BodySnapshot::Bytes(bytes) => {
                    match decode_for_storage(bytes.clone(), is_gzip(request.headers()), to_usize(limit)) {
                        Some(decoded) => {
                            if let Some(note) = decoded.note {
                                ctx.note("form_post", note);
                            }
                            ctx.form_post = decode_form(&decoded.bytes);
                        }
                        None => ctx.note("form_post", "skipped: decoded body over limit"),
                    }
                }
                BodySnapshot::Skipped => ctx.note("form_post", "skipped: body over limit"),
                BodySnapshot::Failed(_) => {}
            }
        }
        snapshot
    }

    /// Apply the save policy and write the request record.
    async fn persist_request(
        &self,
        parts: &request::Parts,
        body: &BodySnapshot,
        ctx: &mut RequestContext,
        mode: SaveMode,
    ) {
        if !should_persist(mode, ctx.has_broadcast) {
            ctx.document_id = DocumentId::NONE;
            return;
        }

        let record = build_request_record(parts, body, ctx, unix_now());
        if let Err(e) = self.store.save_request(ctx.document_id, record).await {
            tracing::warn!(docid = %ctx.document_id, error = %e, "Failed to save request record");
            ctx.note("save", "failed");
        }
    }
}

fn to_usize(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Remove `Proxy-*` headers and the replay marker, returning what was removed.
fn strip_proxy_headers(headers: &mut HeaderMap) -> HeaderMap {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("proxy-") || name.as_str() == REPLAY_HEADER)
        .cloned()
        .collect();

    let mut removed = HeaderMap::new();
    for name in names {
        let values: Vec<HeaderValue> = headers.get_all(&name).iter().cloned().collect();
        headers.remove(&name);
        for value in values {
            removed.append(name.clone(), value);
        }
    }
    removed
}

fn rewrite_rejection(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::from(REWRITE_ERROR_BODY));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[async_trait]
impl InterceptHooks for Interceptor {
    async fn on_connect(&self, host: &str, exchange: Exchange) -> ConnectAction {
        let mut ctx = RequestContext::new(exchange.session_id, exchange.remote_addr.to_string());
        ctx.origin_url = host.to_string();

        if self.connect_events {
            let event = BroadcastEvent::new(DocumentId::NONE, ctx.session_id, host, "", "CONNECT");
            ctx.has_broadcast = self.hub.broadcast(&event).await;
        }

        tracing::debug!(session = ctx.session_id, host = %host, broadcast = ctx.has_broadcast, "Tunnel accepted");
        metrics::record_exchange("tunnel");
        ConnectAction::Accept
    }

    async fn on_request(&self, mut request: Request<Body>, exchange: Exchange) -> RequestAction {
        let settings = self.settings.load_full();
        let mut ctx = RequestContext::new(exchange.session_id, exchange.remote_addr.to_string());

        let proxy_headers = strip_proxy_headers(request.headers_mut());
        ctx.is_replay = proxy_headers.contains_key(REPLAY_HEADER);

        let (parts, body) = request.into_parts();
        ctx.origin_url = absolute_url(&parts);
        let mut request = Request::from_parts(parts, body);

        let Some(user) = self.auth.check(&proxy_headers) else {
            ctx.note("status", "login required");
            ctx.emit_log();
            metrics::record_exchange("unauthorized");
            return RequestAction::Respond {
                response: proxy_auth_required(self.auth.realm()),
                ctx: None,
            };
        };
        ctx.user = user;
        ctx.document_id = self.ids.next();

        let body_snapshot = self
            .capture_request_body(&mut request, settings.max_body_bytes, &mut ctx)
            .await;

        let status = self.rewriter.rewrite(&mut request, &mut ctx);
        ctx.note("js_rewrite_code", status.as_u16());

        let (parts, body) = request.into_parts();
        let event = BroadcastEvent::new(
            ctx.document_id,
            ctx.session_id,
            request_host(&parts),
            parts.uri.path(),
            parts.method.as_str(),
        );
        ctx.has_broadcast = self.hub.broadcast(&event).await;

        let rejected = status != StatusCode::OK && status != StatusCode::NOT_MODIFIED;
        if rejected {
            ctx.message = "rewrite".to_string();
        }

        self.persist_request(&parts, &body_snapshot, &mut ctx, settings.save_mode)
            .await;
        ctx.emit_log();

        if rejected {
            metrics::record_exchange("rewrite_rejected");
            return RequestAction::Respond {
                response: rewrite_rejection(status),
                ctx: Some(ctx),
            };
        }

        metrics::record_exchange("forwarded");
        RequestAction::Forward {
            request: Request::from_parts(parts, body),
            ctx,
        }
    }

    async fn on_response(
        &self,
        response: Option<Response<Body>>,
        ctx: Option<RequestContext>,
    ) -> Option<Response<Body>> {
        let response = response?;
        let Some(ctx) = ctx else {
            tracing::debug!("Response without request context, not captured");
            return Some(response);
        };
        if !ctx.document_id.is_tracked() {
            return Some(response);
        }

        let limit = self.settings.load().max_body_bytes;
        let (parts, mut body) = response.into_parts();
        let mut decode_note = None;

        let snapshot = if declared_length(&parts.headers).is_some_and(|n| n > limit) {
            BodySnapshot::Skipped
        } else {
            match capture(&mut body, to_usize(limit)).await {
                Ok(Captured::Complete(bytes)) => {
                    match decode_for_storage(bytes, is_gzip(&parts.headers), to_usize(limit)) {
                        Some(decoded) => {
                            decode_note = decoded.note;
                            BodySnapshot::Bytes(decoded.bytes)
                        }
                        None => BodySnapshot::Skipped,
                    }
                }
                Ok(Captured::Oversized) => BodySnapshot::Skipped,
                Err(e) => {
                    tracing::warn!(docid = %ctx.document_id, error = %e, "Response body capture failed");
                    BodySnapshot::Failed(e.to_string())
                }
            }
        };
        if snapshot == BodySnapshot::Skipped {
            metrics::record_body_skipped();
        }

        let mut record = build_response_record(&parts, &snapshot, &ctx, unix_now());
        if let Some(note) = decode_note {
            record.extra.insert("body_decode".to_string(), note);
        }

        match self.store.save_response(ctx.document_id, record).await {
            Ok(()) => tracing::debug!(
                session = ctx.session_id,
                docid = %ctx.document_id,
                status = parts.status.as_u16(),
                "Response saved"
            ),
            Err(e) => tracing::warn!(docid = %ctx.document_id, error = %e, "Failed to save response record"),
        }

        Some(Response::from_parts(parts, body))
    }
}
