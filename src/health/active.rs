//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every upstream with a TCP connect
//! - Feed results into the pool's liveness tracking

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::UpstreamPool;

pub struct HealthMonitor {
    pool: Arc<UpstreamPool>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(pool: Arc<UpstreamPool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every upstream once, concurrently.
    pub async fn check_all(&self) {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let upstreams = self.pool.upstreams();

        let results = join_all(upstreams.iter().map(|upstream| async move {
            (upstream.host(), probe(upstream.host(), timeout).await)
        }))
        .await;

        for (host, alive) in results {
            if self.pool.set_alive(host, alive) {
                if alive {
                    tracing::info!(host = %host, "Upstream is back, returned to rotation");
                } else {
                    tracing::warn!(host = %host, "Upstream unreachable, removed from rotation");
                }
            }
        }
    }
}

/// True if a TCP connection to `host` opens within `timeout`.
pub async fn probe(host: &str, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect(host)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(host = %host, error = %e, "Health probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(host = %host, "Health probe timed out");
            false
        }
    }
}
