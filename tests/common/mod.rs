//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use filter_gateway::config::{GatewayConfig, RouteConfig};
use filter_gateway::{HttpServer, Shutdown};

/// What the mock upstream saw for one request.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }
}

pub type Requests = Arc<Mutex<Vec<Recorded>>>;

/// Start a programmable upstream on an ephemeral port. `respond` sees the
/// request and the number of requests received before it.
pub async fn start_upstream<F>(respond: F) -> (SocketAddr, Requests)
where
    F: Fn(&Recorded, usize) -> Response + Send + Sync + 'static,
{
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let seen = requests.clone();
    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let seen = seen.clone();
            let respond = respond.clone();
            async move {
                let recorded = Recorded {
                    method,
                    uri,
                    headers,
                    body,
                };
                let count = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(recorded.clone());
                    seen.len() - 1
                };
                respond(&recorded, count)
            }
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, requests)
}

/// Upstream that echoes the request body with a 200.
pub async fn start_echo_upstream() -> (SocketAddr, Requests) {
    start_upstream(|recorded, _| (StatusCode::OK, recorded.body.clone()).into_response()).await
}

/// A catch-all route to `upstream`.
pub fn route_to(upstream: SocketAddr) -> RouteConfig {
    RouteConfig {
        name: "default".to_string(),
        host: None,
        path_prefix: None,
        upstream: format!("http://{}", upstream),
        priority: 0,
    }
}

/// A running gateway; shut down when dropped.
pub struct Gateway {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the gateway for `config` on an ephemeral port.
pub async fn start_gateway(mut config: GatewayConfig) -> Gateway {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();
    let (_, updates) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let _ = server.run(listener, updates, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Gateway { addr, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// `name=value` of the first `Set-Cookie` for `name`.
pub fn set_cookie_pair(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_string())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
}
