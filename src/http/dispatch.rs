//! Request dispatch.
//!
//! # Request States
//! ```text
//! received → host-selected → forwarding → completed
//! received → selection-failed → 502
//! received → … → panic caught → 502
//! ```
//!
//! # Design Decisions
//! - One attempt per request; no failover to another host
//! - Connection accounting is a guard, so it is released on every exit
//!   path including panics and cancellation
//! - Panics are caught at the top of each request, never past it

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use crate::http::forward::Forwarder;
use crate::http::headers;
use crate::load_balancer::UpstreamPool;
use crate::observability::metrics;

/// Picks an upstream per request and forwards through `F`.
pub struct Dispatcher<F> {
    pool: Arc<UpstreamPool>,
    forwarder: F,
}

impl<F: Forwarder> Dispatcher<F> {
    pub fn new(pool: Arc<UpstreamPool>, forwarder: F) -> Self {
        Self { pool, forwarder }
    }

    /// Handle one request from `remote`. Always produces a response.
    pub async fn dispatch(&self, request: Request<Body>, remote: SocketAddr) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();

        match AssertUnwindSafe(self.proxy(request, remote)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(error = %message, "proxy causes panic");
                metrics::record_request(&method, 502, "none", start);
                (StatusCode::BAD_GATEWAY, message).into_response()
            }
        }
    }

    async fn proxy(&self, mut request: Request<Body>, remote: SocketAddr) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let client_ip = headers::client_ip(request.headers(), remote);

        let upstream = match self.pool.acquire(&client_ip) {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(client_ip = %client_ip, error = %e, "No upstream selected");
                metrics::record_request(&method, 502, "none", start);
                return (StatusCode::BAD_GATEWAY, format!("balance error: {e}")).into_response();
            }
        };

        tracing::debug!(
            client_ip = %client_ip,
            upstream = %upstream.host(),
            method = %method,
            path = %request.uri().path(),
            "Forwarding request"
        );

        headers::apply_proxy_headers(request.headers_mut(), &client_ip, remote.ip());

        match self.forwarder.forward(upstream.url(), request).await {
            Ok(response) => {
                metrics::record_request(&method, response.status().as_u16(), upstream.host(), start);
                response
            }
            Err(e) => {
                tracing::error!(upstream = %upstream.host(), error = %e, "http: proxy error");
                metrics::record_request(&method, 502, upstream.host(), start);
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::forward::ForwardError;
    use axum::http::HeaderName;
    use crate::load_balancer::{least_load, round_robin, Balancer, BalancerError, BalancerFactory};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    /// Echoes the chosen upstream and the proxy headers back.
    struct EchoForwarder;

    impl Forwarder for EchoForwarder {
        async fn forward(
            &self,
            target: &Url,
            request: Request<Body>,
        ) -> Result<Response<Body>, ForwardError> {
            let header = |name: HeaderName| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            let body = format!(
                "{}|{}|{}",
                target.as_str(),
                header(headers::X_PROXY),
                header(headers::X_REAL_IP)
            );
            Ok(Response::new(Body::from(body)))
        }
    }

    /// Panics on the first call, then succeeds.
    #[derive(Default)]
    struct FlakyForwarder {
        calls: AtomicUsize,
    }

    impl Forwarder for FlakyForwarder {
        async fn forward(
            &self,
            _target: &Url,
            _request: Request<Body>,
        ) -> Result<Response<Body>, ForwardError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("upstream exploded");
            }
            Ok(Response::new(Body::from("recovered")))
        }
    }

    /// Never finishes.
    struct StalledForwarder;

    impl Forwarder for StalledForwarder {
        async fn forward(
            &self,
            _target: &Url,
            _request: Request<Body>,
        ) -> Result<Response<Body>, ForwardError> {
            std::future::pending().await
        }
    }

    /// Forwarder whose upstream is always unreachable.
    struct RefusingForwarder;

    impl Forwarder for RefusingForwarder {
        async fn forward(
            &self,
            _target: &Url,
            _request: Request<Body>,
        ) -> Result<Response<Body>, ForwardError> {
            let invalid = Request::builder().header("bad header", "x").body(()).unwrap_err();
            Err(ForwardError::Uri(invalid))
        }
    }

    /// Round-robin that records every `inc` and `done` per host.
    #[derive(Debug)]
    struct CountingBalancer {
        inner: round_robin::RoundRobin,
        counts: Arc<Mutex<HashMap<String, (u64, u64)>>>,
    }

    impl Balancer for CountingBalancer {
        fn add(&self, host: &str) {
            self.inner.add(host);
        }

        fn remove(&self, host: &str) {
            self.inner.remove(host);
        }

        fn balance(&self, key: &str) -> Result<String, BalancerError> {
            self.inner.balance(key)
        }

        fn inc(&self, host: &str) {
            self.counts.lock().unwrap().entry(host.to_string()).or_default().0 += 1;
        }

        fn done(&self, host: &str) {
            self.counts.lock().unwrap().entry(host.to_string()).or_default().1 += 1;
        }

        fn hosts(&self) -> Vec<String> {
            self.inner.hosts()
        }
    }

    type Counts = Arc<Mutex<HashMap<String, (u64, u64)>>>;

    fn counting_pool(urls: &[&str]) -> (Arc<UpstreamPool>, Counts) {
        let counts: Counts = Arc::default();
        let mut factory = BalancerFactory::new();
        let shared = counts.clone();
        factory.register("counting", move |hosts| {
            Box::new(CountingBalancer {
                inner: round_robin::RoundRobin::new(hosts),
                counts: shared.clone(),
            })
        });
        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        let pool = Arc::new(UpstreamPool::new(&urls, "counting", &factory).unwrap());
        (pool, counts)
    }

    fn assert_balanced(counts: &Counts, expected_per_host: u64) {
        let counts = counts.lock().unwrap();
        assert!(!counts.is_empty());
        for (host, (inc, done)) in counts.iter() {
            assert_eq!(inc, done, "unbalanced accounting for {host}");
            assert_eq!(*inc, expected_per_host, "request count for {host}");
        }
    }

    fn pool(urls: &[&str], algorithm: &str) -> Arc<UpstreamPool> {
        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        Arc::new(UpstreamPool::new(&urls, algorithm, &BalancerFactory::with_builtin()).unwrap())
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    fn remote() -> SocketAddr {
        "192.0.2.7:40000".parse().unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn forwards_in_round_robin_order_with_proxy_headers() {
        let dispatcher = Dispatcher::new(
            pool(&["http://10.0.0.1:80", "http://10.0.0.2:80"], round_robin::NAME),
            EchoForwarder,
        );

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let response = dispatcher.dispatch(request(), remote()).await;
            assert_eq!(response.status(), StatusCode::OK);
            bodies.push(body_text(response).await);
        }

        assert_eq!(
            bodies,
            vec![
                "http://10.0.0.1/|Balancer-Reverse-Proxy|192.0.2.7",
                "http://10.0.0.2/|Balancer-Reverse-Proxy|192.0.2.7",
                "http://10.0.0.1/|Balancer-Reverse-Proxy|192.0.2.7",
            ]
        );
    }

    #[tokio::test]
    async fn empty_pool_yields_bad_gateway() {
        let dispatcher = Dispatcher::new(pool(&[], round_robin::NAME), EchoForwarder);

        let response = dispatcher.dispatch(request(), remote()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, "balance error: no host available");
    }

    #[tokio::test]
    async fn panic_is_contained_and_accounting_released() {
        let pool = pool(&["http://10.0.0.1:80"], least_load::NAME);
        let dispatcher = Dispatcher::new(pool.clone(), FlakyForwarder::default());

        let response = dispatcher.dispatch(request(), remote()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, "upstream exploded");
        assert_eq!(pool.upstream("10.0.0.1:80").unwrap().in_flight(), 0);

        let response = dispatcher.dispatch(request(), remote()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "recovered");
        assert_eq!(pool.upstream("10.0.0.1:80").unwrap().in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_request_releases_accounting() {
        let pool = pool(&["http://10.0.0.1:80"], round_robin::NAME);
        let dispatcher = Dispatcher::new(pool.clone(), StalledForwarder);

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), dispatcher.dispatch(request(), remote()))
                .await;
        assert!(outcome.is_err());
        assert_eq!(pool.upstream("10.0.0.1:80").unwrap().in_flight(), 0);
    }

    #[tokio::test]
    async fn forwarded_for_chain_drives_key() {
        let dispatcher = Dispatcher::new(
            pool(&["http://10.0.0.1:80", "http://10.0.0.2:80"], round_robin::NAME),
            EchoForwarder,
        );
        let request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9, 10.1.1.1")
            .body(Body::empty())
            .unwrap();

        let body = body_text(dispatcher.dispatch(request, remote()).await).await;
        assert!(body.ends_with("|203.0.113.9"), "{body}");
    }

    #[tokio::test]
    async fn inc_and_done_pair_up_on_success() {
        let (pool, counts) = counting_pool(&["http://10.0.0.1:80", "http://10.0.0.2:80"]);
        let dispatcher = Dispatcher::new(pool, EchoForwarder);

        for _ in 0..4 {
            let response = dispatcher.dispatch(request(), remote()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_balanced(&counts, 2);
    }

    #[tokio::test]
    async fn inc_and_done_pair_up_on_forward_error() {
        let (pool, counts) = counting_pool(&["http://10.0.0.1:80"]);
        let dispatcher = Dispatcher::new(pool, RefusingForwarder);

        for _ in 0..3 {
            let response = dispatcher.dispatch(request(), remote()).await;
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
            assert!(body_text(response).await.is_empty());
        }
        assert_balanced(&counts, 3);
    }

    #[tokio::test]
    async fn inc_and_done_pair_up_on_panic() {
        let (pool, counts) = counting_pool(&["http://10.0.0.1:80"]);
        let dispatcher = Dispatcher::new(pool, FlakyForwarder::default());

        let response = dispatcher.dispatch(request(), remote()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_balanced(&counts, 1);

        let response = dispatcher.dispatch(request(), remote()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_balanced(&counts, 2);
    }

    #[tokio::test]
    async fn inc_and_done_pair_up_on_cancellation() {
        let (pool, counts) = counting_pool(&["http://10.0.0.1:80"]);
        let dispatcher = Dispatcher::new(pool, StalledForwarder);

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), dispatcher.dispatch(request(), remote()))
                .await;
        assert!(outcome.is_err());
        assert_balanced(&counts, 1);
    }

    #[test]
    fn panic_payloads_render() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "static");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
