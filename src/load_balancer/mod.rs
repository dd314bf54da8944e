//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     backend URLs → pool.rs (parse, host identifiers)
//!     → factory.rs (algorithm name → constructor)
//!     → concrete strategy owning a registry.rs HostRegistry
//!
//! Per request:
//!     selection key → Balancer::balance → host
//!     → Balancer::inc … forward … Balancer::done
//! ```
//!
//! # Design Decisions
//! - Strategies compose a `HostRegistry` instead of sharing a base type
//! - The empty check and the index computation happen under one read lock
//! - Algorithms are registered on an explicit factory object, no global map
//! - `inc`/`done` default to no-ops for strategies that ignore load

use std::fmt;

use thiserror::Error;

pub mod factory;
pub mod ip_hash;
pub mod least_load;
pub mod pool;
pub mod random;
pub mod registry;
pub mod round_robin;

pub use factory::BalancerFactory;
pub use pool::{PoolError, Upstream, UpstreamGuard, UpstreamPool};
pub use registry::HostRegistry;

/// Errors raised by balancer construction and selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// The registry held no hosts at selection time.
    #[error("no host available")]
    NoHostAvailable,

    /// No constructor is registered under the requested name.
    #[error("algorithm not supported: {0}")]
    AlgorithmNotSupported(String),
}

/// A host selection strategy.
///
/// Hosts are opaque identifiers, conventionally `address:port`.
pub trait Balancer: Send + Sync + fmt::Debug {
    /// Add a host. Adding a host that is already present does nothing.
    fn add(&self, host: &str);

    /// Remove a host. Removing an absent host does nothing.
    fn remove(&self, host: &str);

    /// Select a host for `key`.
    ///
    /// The meaning of `key` depends on the algorithm; round-robin ignores it.
    fn balance(&self, key: &str) -> Result<String, BalancerError>;

    /// A request to `host` started.
    fn inc(&self, _host: &str) {}

    /// A request to `host` finished.
    fn done(&self, _host: &str) {}

    /// Current hosts in registry order.
    fn hosts(&self) -> Vec<String>;
}
