//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use capture_proxy::config::ProxyConfig;
use capture_proxy::lifecycle::{startup, Shutdown};
use capture_proxy::Interceptor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// What a programmable backend answers.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// Read one request head (and its declared body) off the socket.
/// Returns the request line.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut remaining = content_length.saturating_sub(buf.len() - head_end);
    while remaining > 0 {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    head.lines().next().map(str::to_string)
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    start_programmable_backend(addr, move |_| MockResponse::ok(response)).await;
}

/// Start a backend whose answer depends on the request line.
pub async fn start_programmable_backend<F>(addr: SocketAddr, f: F)
where
    F: Fn(&str) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request_line) = read_request(&mut socket).await else {
                            return;
                        };
                        let response = f(&request_line);
                        let mut head = format!(
                            "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n",
                            response.status,
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{name}: {value}\r\n"));
                        }
                        head.push_str("\r\n");
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(&response.body).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Config listening on `proxy_addr` with an in-memory store, one user and
/// the admin API off.
pub fn proxy_config(proxy_addr: SocketAddr) -> ProxyConfig {
    let mut config: ProxyConfig = toml::from_str(
        r#"
        [storage]
        backend = "memory"

        [auth]
        realm = "test"
        users = [{ name = "alice", password = "pw" }]

        [broadcast]
        send_timeout_ms = 20
        "#,
    )
    .unwrap();
    config.listener.bind_address = proxy_addr.to_string();
    config.admin.enabled = false;
    config
}

/// Start the proxy (and, when enabled, the admin API) in the background.
pub async fn start_proxy(config: ProxyConfig) -> (Arc<Interceptor>, Shutdown) {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let admin_listener = if config.admin.enabled {
        Some(TcpListener::bind(&config.admin.bind_address).await.unwrap())
    } else {
        None
    };

    let proxy = startup::build(config).await.unwrap();
    let shutdown = Shutdown::new();

    if let (Some(listener), Some(router)) = (admin_listener, proxy.admin) {
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = startup::serve_admin(listener, router, rx).await;
        });
    }

    let interceptor = proxy.interceptor.clone();
    let (_, config_updates) = mpsc::unbounded_channel();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = proxy.server.run(listener, config_updates, rx).await;
    });

    (interceptor, shutdown)
}

/// A reqwest client that goes through the proxy, optionally with credentials.
pub fn proxied_client(proxy_addr: SocketAddr, credentials: Option<(&str, &str)>) -> reqwest::Client {
    let mut proxy = reqwest::Proxy::http(format!("http://{proxy_addr}")).unwrap();
    if let Some((user, password)) = credentials {
        proxy = proxy.basic_auth(user, password);
    }
    reqwest::Client::builder()
        .proxy(proxy)
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
