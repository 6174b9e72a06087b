//! Interception engine.
//!
//! # Responsibilities
//! - Accept proxied HTTP requests (absolute or origin form)
//! - Issue a session id per exchange
//! - Drive the `InterceptHooks` around each upstream round trip
//! - Tunnel CONNECT requests byte-for-byte
//! - Apply reloaded capture settings

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request, HeaderMap, Method, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::intercept::{ConnectAction, Exchange, InterceptHooks, Interceptor, RequestAction};

/// Headers that only apply to a single hop.
const HOP_BY_HOP: [header::HeaderName; 5] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub hooks: Arc<dyn InterceptHooks>,
    pub client: Client<HttpConnector, Body>,
    sessions: Arc<AtomicI64>,
}

impl AppState {
    pub fn new(hooks: Arc<dyn InterceptHooks>) -> Self {
        Self {
            hooks,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            sessions: Arc::new(AtomicI64::new(0)),
        }
    }

    fn next_session(&self) -> i64 {
        self.sessions.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Error)]
enum ForwardError {
    #[error("request has neither an absolute URI nor a Host header")]
    MissingHost,

    #[error("invalid upstream URI: {0}")]
    InvalidUri(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// The intercepting proxy server.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    interceptor: Arc<Interceptor>,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, interceptor: Arc<Interceptor>) -> Self {
        let state = AppState::new(interceptor.clone());
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            interceptor,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Proxied requests carry arbitrary paths (or none, for CONNECT), so
    /// everything goes through the fallback.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires. Capture settings from `config_updates`
    /// apply to exchanges that start after the update.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            save_mode = ?self.config.capture.save_mode,
            "Capture proxy starting"
        );

        let interceptor = self.interceptor.clone();
        let current = self.config.clone();
        tokio::spawn(async move {
            while let Some(update) = config_updates.recv().await {
                warn_restart_only_changes(&current, &update);
                interceptor.apply_capture_config(update.capture);
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("Capture proxy stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}

fn warn_restart_only_changes(current: &ProxyConfig, update: &ProxyConfig) {
    if current.listener.bind_address != update.listener.bind_address
        || current.storage.data_dir != update.storage.data_dir
        || current.storage.backend != update.storage.backend
        || current.admin.bind_address != update.admin.bind_address
    {
        tracing::warn!("Listener, storage or admin settings changed; restart to apply");
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let exchange = Exchange {
        session_id: state.next_session(),
        remote_addr,
    };

    if request.method() == Method::CONNECT {
        return tunnel(state, request, exchange).await;
    }

    let (response, ctx) = match state.hooks.on_request(request, exchange).await {
        RequestAction::Respond { response, ctx } => (Some(response), ctx),
        RequestAction::Forward { request, ctx } => match forward(&state.client, request).await {
            Ok(response) => (Some(response), Some(ctx)),
            Err(e) => {
                tracing::warn!(session = exchange.session_id, docid = %ctx.document_id, error = %e, "Upstream error");
                (None, Some(ctx))
            }
        },
    };

    match state.hooks.on_response(response, ctx).await {
        Some(response) => response,
        None => (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response(),
    }
}

async fn forward(
    client: &Client<HttpConnector, Body>,
    request: Request<Body>,
) -> Result<Response<Body>, ForwardError> {
    let (mut parts, body) = request.into_parts();
    parts.uri = upstream_uri(&parts)?;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);

    let response = client.request(Request::from_parts(parts, body)).await?;
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Absolute URI for the upstream request; origin-form targets take the Host header.
fn upstream_uri(parts: &request::Parts) -> Result<Uri, ForwardError> {
    if parts.uri.authority().is_some() {
        return Ok(parts.uri.clone());
    }
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or(ForwardError::MissingHost)?;
    let path = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Ok(Uri::builder()
        .scheme("http")
        .authority(host)
        .path_and_query(path)
        .build()?)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Answer a CONNECT and splice the upgraded connection to the target.
async fn tunnel(state: AppState, request: Request<Body>, exchange: Exchange) -> Response {
    let Some(target) = request.uri().authority().map(|a| a.to_string()) else {
        return (StatusCode::BAD_REQUEST, "CONNECT target must be host:port").into_response();
    };

    if state.hooks.on_connect(&target, exchange).await == ConnectAction::Reject {
        return StatusCode::FORBIDDEN.into_response();
    }

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(request).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::warn!(session = exchange.session_id, target = %target, error = %e, "CONNECT upgrade failed");
                return;
            }
        };
        let mut server = match TcpStream::connect(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session = exchange.session_id, target = %target, error = %e, "Tunnel target unreachable");
                return;
            }
        };
        let mut client = TokioIo::new(upgraded);
        match tokio::io::copy_bidirectional(&mut client, &mut server).await {
            Ok((sent, received)) => tracing::debug!(
                session = exchange.session_id,
                target = %target,
                sent,
                received,
                "Tunnel closed"
            ),
            Err(e) => tracing::debug!(session = exchange.session_id, target = %target, error = %e, "Tunnel aborted"),
        }
    });

    Response::new(Body::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str, host: Option<&str>) -> request::Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_absolute_uri_is_kept() {
        let uri = upstream_uri(&parts("http://example.com:8080/a?b=1", None)).unwrap();
        assert_eq!(uri.to_string(), "http://example.com:8080/a?b=1");
    }

    #[test]
    fn test_origin_form_uses_host() {
        let uri = upstream_uri(&parts("/a?b=1", Some("example.com"))).unwrap();
        assert_eq!(uri.to_string(), "http://example.com/a?b=1");
        assert!(matches!(upstream_uri(&parts("/a", None)), Err(ForwardError::MissingHost)));
    }

    #[test]
    fn test_hop_by_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive, x-private".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-private", "1".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_sessions_are_sequential() {
        let state = AppState::new(Arc::new(Interceptor::from_config(
            &ProxyConfig::default(),
            crate::storage::CaptureStore::memory(),
            Arc::new(crate::broadcast::BroadcastHub::new(&Default::default())),
        )));
        assert_eq!(state.next_session(), 1);
        assert_eq!(state.next_session(), 2);
    }
}
