//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler as fallback
//! - Wire up middleware (trace, request ID, timeout)
//! - Build the upstream pool and dispatcher from configuration
//! - Run background tasks (health monitor, config reload)
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::dispatch::Dispatcher;
use crate::http::forward::{Forwarder, HttpForwarder};
use crate::load_balancer::{BalancerFactory, PoolError, UpstreamPool};

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    pool: Arc<UpstreamPool>,
}

impl HttpServer {
    /// Create a server forwarding over plain HTTP.
    ///
    /// Fails if a backend URL is malformed or the algorithm is not registered
    /// on `factory`.
    pub fn new(config: ProxyConfig, factory: &BalancerFactory) -> Result<Self, PoolError> {
        let forwarder = HttpForwarder::new(Duration::from_secs(config.timeouts.connect_secs));
        Self::with_forwarder(config, factory, forwarder)
    }

    /// Create a server forwarding through a custom `forwarder`.
    pub fn with_forwarder<F: Forwarder>(
        config: ProxyConfig,
        factory: &BalancerFactory,
        forwarder: F,
    ) -> Result<Self, PoolError> {
        let pool = Arc::new(UpstreamPool::new(
            &config.backends,
            &config.algorithm,
            factory,
        )?);
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), forwarder));
        let router = Self::build_router(&config, dispatcher);

        Ok(Self {
            router,
            config,
            pool,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router<F: Forwarder>(config: &ProxyConfig, dispatcher: Arc<Dispatcher<F>>) -> Router {
        Router::new()
            .fallback(proxy_handler::<F>)
            .with_state(dispatcher)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Backend lists arriving on `config_updates` are applied to the pool.
    /// Returns once `shutdown` fires and in-flight requests have drained.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            algorithm = %self.pool.algorithm(),
            "HTTP server starting"
        );

        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(self.pool.clone(), self.config.health_check.clone());
            tokio::spawn(monitor.run(shutdown.resubscribe()));
        }

        tokio::spawn(apply_reloads(
            self.pool.clone(),
            self.config.algorithm.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn pool(&self) -> &Arc<UpstreamPool> {
        &self.pool
    }

    /// The router, for driving the server without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Main proxy handler.
async fn proxy_handler<F: Forwarder>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    dispatcher.dispatch(request, remote).await
}

async fn apply_reloads(
    pool: Arc<UpstreamPool>,
    algorithm: String,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                if config.algorithm != algorithm {
                    tracing::warn!(
                        current = %algorithm,
                        requested = %config.algorithm,
                        "Algorithm change requires a restart, ignoring"
                    );
                }
                if let Err(e) = pool.sync(&config.backends) {
                    tracing::error!(error = %e, "Backend reload rejected");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
