//! Algorithm registry.
//!
//! # Responsibilities
//! - Map algorithm names to balancer constructors
//! - Build the configured balancer at startup
//!
//! # Design Decisions
//! - The registry is a plain value populated by each algorithm's `register`
//!   function and passed to the proxy, so nothing depends on load order
//! - Unknown names fail construction; there is no fallback algorithm

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::load_balancer::{ip_hash, least_load, random, round_robin, Balancer, BalancerError};

/// Builds a balancer from its initial host list.
pub type Constructor = Arc<dyn Fn(Vec<String>) -> Box<dyn Balancer> + Send + Sync>;

#[derive(Clone, Default)]
pub struct BalancerFactory {
    constructors: HashMap<String, Constructor>,
}

impl BalancerFactory {
    /// An empty factory. Nothing can be built until algorithms are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with every algorithm shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        round_robin::register(&mut factory);
        random::register(&mut factory);
        ip_hash::register(&mut factory);
        least_load::register(&mut factory);
        factory
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Vec<String>) -> Box<dyn Balancer> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Build the balancer registered as `algorithm`, seeded with `hosts`.
    pub fn build(
        &self,
        algorithm: &str,
        hosts: Vec<String>,
    ) -> Result<Arc<dyn Balancer>, BalancerError> {
        let constructor = self
            .constructors
            .get(algorithm)
            .ok_or_else(|| BalancerError::AlgorithmNotSupported(algorithm.to_string()))?;
        Ok(Arc::from(constructor(hosts)))
    }

    pub fn supports(&self, algorithm: &str) -> bool {
        self.constructors.contains_key(algorithm)
    }

    /// Registered algorithm names, sorted.
    pub fn algorithms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for BalancerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalancerFactory")
            .field("algorithms", &self.algorithms())
            .finish()
    }
}
