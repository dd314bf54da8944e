//! Uniform random selection.

use crate::load_balancer::{Balancer, BalancerError, BalancerFactory, HostRegistry};

pub const NAME: &str = "random";

#[derive(Debug, Default)]
pub struct Random {
    hosts: HostRegistry,
}

impl Random {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: HostRegistry::new(hosts),
        }
    }
}

impl Balancer for Random {
    fn add(&self, host: &str) {
        self.hosts.add(host);
    }

    fn remove(&self, host: &str) {
        self.hosts.remove(host);
    }

    fn balance(&self, _key: &str) -> Result<String, BalancerError> {
        self.hosts.with_hosts(|hosts| {
            if hosts.is_empty() {
                return Err(BalancerError::NoHostAvailable);
            }
            Ok(hosts[fastrand::usize(..hosts.len())].clone())
        })
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.snapshot()
    }
}

pub fn register(factory: &mut BalancerFactory) {
    factory.register(NAME, |hosts| Box::new(Random::new(hosts)));
}
