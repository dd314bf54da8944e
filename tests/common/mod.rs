//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::Request, Router};
use balancer::{BalancerFactory, HttpServer, ProxyConfig, Shutdown};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Start a backend that answers every request with
/// `<name>|<x-proxy>|<x-real-ip>|<x-forwarded-for>`.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |request: Request| async move {
        let header = |key: &str| {
            request
                .headers()
                .get(key)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string()
        };
        format!(
            "{}|{}|{}|{}",
            name,
            header("x-proxy"),
            header("x-real-ip"),
            header("x-forwarded-for")
        )
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// A running proxy bound to an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub server_pool: std::sync::Arc<balancer::load_balancer::UpstreamPool>,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Default test configuration: given backends, no health checks.
pub fn config(backends: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backends = backends.iter().map(|b| format!("http://{b}")).collect();
    config.health_check.enabled = false;
    config
}

/// Serve `server` on an ephemeral port until the returned proxy is dropped.
pub async fn spawn_proxy(server: HttpServer) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_pool = server.pool().clone();

    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestProxy {
        addr,
        server_pool,
        shutdown,
    }
}

/// Build and serve a plain HTTP proxy for `config`.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let server = HttpServer::new(config, &BalancerFactory::with_builtin()).unwrap();
    spawn_proxy(server).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
