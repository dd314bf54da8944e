//! Least-load selection.

use dashmap::DashMap;

use crate::load_balancer::{Balancer, BalancerError, BalancerFactory, HostRegistry};

pub const NAME: &str = "least-load";

/// Selects the host with the fewest in-flight requests.
/// Load is whatever `inc`/`done` reported; hosts never reported count as zero.
#[derive(Debug, Default)]
pub struct LeastLoad {
    hosts: HostRegistry,
    loads: DashMap<String, u64>,
}

impl LeastLoad {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: HostRegistry::new(hosts),
            loads: DashMap::new(),
        }
    }

    /// In-flight requests currently attributed to `host`.
    pub fn load(&self, host: &str) -> u64 {
        self.loads.get(host).map(|load| *load).unwrap_or(0)
    }
}

impl Balancer for LeastLoad {
    fn add(&self, host: &str) {
        self.hosts.add(host);
    }

    fn remove(&self, host: &str) {
        self.hosts.remove(host);
        self.loads.remove(host);
    }

    fn balance(&self, _key: &str) -> Result<String, BalancerError> {
        self.hosts.with_hosts(|hosts| {
            // min_by_key keeps the first minimum, so ties go to registry order
            hosts
                .iter()
                .min_by_key(|host| self.load(host))
                .cloned()
                .ok_or(BalancerError::NoHostAvailable)
        })
    }

    fn inc(&self, host: &str) {
        *self.loads.entry(host.to_string()).or_insert(0) += 1;
    }

    fn done(&self, host: &str) {
        if let Some(mut load) = self.loads.get_mut(host) {
            *load = load.saturating_sub(1);
        }
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.snapshot()
    }
}

pub fn register(factory: &mut BalancerFactory) {
    factory.register(NAME, |hosts| Box::new(LeastLoad::new(hosts)));
}
