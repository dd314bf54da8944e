//! Upstream pool management.
//!
//! # Responsibilities
//! - Parse backend URLs into host identifiers (`host:port`)
//! - Own the balancer built for the configured algorithm
//! - Track in-flight requests and liveness per upstream
//! - Hand out guards that release connection accounting on drop
//!
//! # Design Decisions
//! - The upstream table has its own lock, separate from the balancer registry
//! - Liveness changes become balancer add/remove; selection never reads it
//! - Runtime mutation (reload, health) goes through the table's write lock first
//! - Lock order is table then registry, including `acquire`

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use url::Url;

use crate::load_balancer::{Balancer, BalancerError, BalancerFactory};
use crate::observability::metrics;

/// Errors raised while building or using the upstream pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid upstream url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {scheme:?} in upstream url {url:?}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("upstream url {0:?} has no host")]
    MissingHost(String),

    /// The balancer picked a host the pool no longer tracks.
    #[error("unknown upstream host {0}")]
    UnknownHost(String),

    #[error(transparent)]
    Balancer(#[from] BalancerError),
}

/// A single backend server.
#[derive(Debug)]
pub struct Upstream {
    host: String,
    url: Url,
    in_flight: AtomicU64,
    alive: AtomicBool,
}

impl Upstream {
    /// Parse a backend URL such as `http://10.0.0.1:8080`.
    ///
    /// The host identifier is `host:port`, using the scheme's default port
    /// when the URL has none.
    pub fn parse(raw: &str) -> Result<Self, PoolError> {
        let url = Url::parse(raw).map_err(|source| PoolError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PoolError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: url.scheme().to_string(),
            });
        }

        let host = url
            .host_str()
            .ok_or_else(|| PoolError::MissingHost(raw.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| PoolError::MissingHost(raw.to_string()))?;

        Ok(Self {
            host: format!("{host}:{port}"),
            url,
            in_flight: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        })
    }

    /// Host identifier (`host:port`).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Target URL requests are forwarded to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

/// Upstreams plus the balancer selecting among them.
#[derive(Debug)]
pub struct UpstreamPool {
    algorithm: String,
    balancer: Arc<dyn Balancer>,
    upstreams: RwLock<HashMap<String, Arc<Upstream>>>,
}

impl UpstreamPool {
    /// Parse `urls` and build the balancer registered as `algorithm`.
    ///
    /// Fails on the first malformed URL or on an unknown algorithm; nothing
    /// is constructed in that case.
    pub fn new(
        urls: &[String],
        algorithm: &str,
        factory: &BalancerFactory,
    ) -> Result<Self, PoolError> {
        let mut hosts = Vec::with_capacity(urls.len());
        let mut upstreams = HashMap::with_capacity(urls.len());

        for raw in urls {
            let upstream = Upstream::parse(raw)?;
            if upstreams.contains_key(upstream.host()) {
                tracing::warn!(url = %raw, host = %upstream.host(), "Duplicate upstream ignored");
                continue;
            }
            hosts.push(upstream.host().to_string());
            upstreams.insert(upstream.host().to_string(), Arc::new(upstream));
        }

        let balancer = factory.build(algorithm, hosts)?;

        tracing::info!(
            algorithm = %algorithm,
            upstreams = upstreams.len(),
            "Upstream pool ready"
        );

        Ok(Self {
            algorithm: algorithm.to_string(),
            balancer,
            upstreams: RwLock::new(upstreams),
        })
    }

    /// Select an upstream for `key` and mark a request to it as started.
    /// The returned guard marks it finished when dropped.
    ///
    /// Selection and lookup happen under one table read lock, so a
    /// concurrent removal cannot split them.
    pub fn acquire(&self, key: &str) -> Result<UpstreamGuard, PoolError> {
        let upstreams = self.read();
        let host = self.balancer.balance(key)?;
        match upstreams.get(&host).cloned() {
            Some(upstream) => Ok(UpstreamGuard::new(upstream, self.balancer.clone())),
            None => Err(PoolError::UnknownHost(host)),
        }
    }

    /// Add an upstream at runtime. Returns false if its host is already present.
    pub fn insert(&self, raw: &str) -> Result<bool, PoolError> {
        let upstream = Upstream::parse(raw)?;
        let mut upstreams = self.write();
        if upstreams.contains_key(upstream.host()) {
            return Ok(false);
        }

        tracing::info!(host = %upstream.host(), "Upstream added");
        self.balancer.add(upstream.host());
        upstreams.insert(upstream.host().to_string(), Arc::new(upstream));
        Ok(true)
    }

    /// Remove an upstream at runtime. Returns false if it was not present.
    pub fn remove(&self, host: &str) -> bool {
        let mut upstreams = self.write();
        if upstreams.remove(host).is_none() {
            return false;
        }

        tracing::info!(host = %host, "Upstream removed");
        self.balancer.remove(host);
        true
    }

    /// Make the pool match `urls`: drop hosts not listed, add new ones.
    ///
    /// Every URL is parsed before anything changes, so a bad entry leaves
    /// the pool untouched.
    pub fn sync(&self, urls: &[String]) -> Result<(), PoolError> {
        let parsed = urls
            .iter()
            .map(|raw| Upstream::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let wanted: HashSet<&str> = parsed.iter().map(Upstream::host).collect();

        let mut upstreams = self.write();

        let stale: Vec<String> = upstreams
            .keys()
            .filter(|host| !wanted.contains(host.as_str()))
            .cloned()
            .collect();
        for host in stale {
            upstreams.remove(&host);
            self.balancer.remove(&host);
            tracing::info!(host = %host, "Upstream removed by reload");
        }

        for upstream in parsed {
            if upstreams.contains_key(upstream.host()) {
                continue;
            }
            self.balancer.add(upstream.host());
            tracing::info!(host = %upstream.host(), "Upstream added by reload");
            upstreams.insert(upstream.host().to_string(), Arc::new(upstream));
        }

        Ok(())
    }

    /// Record the liveness of `host`.
    ///
    /// A host going down is removed from the balancer, a host coming back is
    /// added again. Returns true when the state actually changed.
    pub fn set_alive(&self, host: &str, alive: bool) -> bool {
        let upstreams = self.read();
        let Some(upstream) = upstreams.get(host) else {
            return false;
        };
        if upstream.alive.swap(alive, Ordering::SeqCst) == alive {
            return false;
        }

        if alive {
            self.balancer.add(host);
        } else {
            self.balancer.remove(host);
        }
        metrics::record_upstream_alive(host, alive);
        true
    }

    pub fn upstream(&self, host: &str) -> Option<Arc<Upstream>> {
        self.read().get(host).cloned()
    }

    /// All tracked upstreams, sorted by host.
    pub fn upstreams(&self) -> Vec<Arc<Upstream>> {
        let mut all: Vec<Arc<Upstream>> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.host.cmp(&b.host));
        all
    }

    pub fn balancer(&self) -> &Arc<dyn Balancer> {
        &self.balancer
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Upstream>>> {
        self.upstreams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Upstream>>> {
        self.upstreams.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A RAII guard for one in-flight request.
///
/// Creating it calls `inc` on the balancer; dropping it calls `done`. Drop
/// runs on every exit path, including panics and cancelled futures.
#[derive(Debug)]
pub struct UpstreamGuard {
    upstream: Arc<Upstream>,
    balancer: Arc<dyn Balancer>,
}

impl UpstreamGuard {
    fn new(upstream: Arc<Upstream>, balancer: Arc<dyn Balancer>) -> Self {
        balancer.inc(upstream.host());
        let in_flight = upstream.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_in_flight(upstream.host(), in_flight);
        Self { upstream, balancer }
    }

    pub fn host(&self) -> &str {
        self.upstream.host()
    }

    pub fn url(&self) -> &Url {
        self.upstream.url()
    }
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        let in_flight = self.upstream.in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::record_in_flight(self.upstream.host(), in_flight);
        self.balancer.done(self.upstream.host());
    }
}
