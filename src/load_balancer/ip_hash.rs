//! Client-affine selection by hashing the key.
//!
//! A key maps to the same host for as long as the host list is unchanged.
//! Any add/remove reshuffles the mapping; there is no consistent-hash ring.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::load_balancer::{Balancer, BalancerError, BalancerFactory, HostRegistry};

pub const NAME: &str = "ip-hash";

#[derive(Debug, Default)]
pub struct IpHash {
    hosts: HostRegistry,
}

impl IpHash {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: HostRegistry::new(hosts),
        }
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl Balancer for IpHash {
    fn add(&self, host: &str) {
        self.hosts.add(host);
    }

    fn remove(&self, host: &str) {
        self.hosts.remove(host);
    }

    fn balance(&self, key: &str) -> Result<String, BalancerError> {
        let hash = hash_key(key);
        self.hosts.with_hosts(|hosts| {
            if hosts.is_empty() {
                return Err(BalancerError::NoHostAvailable);
            }
            Ok(hosts[(hash % hosts.len() as u64) as usize].clone())
        })
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.snapshot()
    }
}

pub fn register(factory: &mut BalancerFactory) {
    factory.register(NAME, |hosts| Box::new(IpHash::new(hosts)));
}
