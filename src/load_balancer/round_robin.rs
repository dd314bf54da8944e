//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::load_balancer::{Balancer, BalancerError, BalancerFactory, HostRegistry};

/// Name under which the strategy registers itself.
pub const NAME: &str = "round-robin";

/// Round-robin selector.
/// Hands out hosts in registry order using a wrapping cursor.
#[derive(Debug, Default)]
pub struct RoundRobin {
    hosts: HostRegistry,
    cursor: AtomicU64,
}

impl RoundRobin {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: HostRegistry::new(hosts),
            cursor: AtomicU64::new(0),
        }
    }
}

impl Balancer for RoundRobin {
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
            // fetch_add wraps on overflow
            let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
            let index = (cursor % hosts.len() as u64) as usize;
            Ok(hosts[index].clone())
        })
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.snapshot()
    }
}

pub fn register(factory: &mut BalancerFactory) {
    factory.register(NAME, |hosts| Box::new(RoundRobin::new(hosts)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new(hosts(&["10.0.0.1:80", "10.0.0.2:80"]));

        assert_eq!(lb.balance("").unwrap(), "10.0.0.1:80");
        assert_eq!(lb.balance("").unwrap(), "10.0.0.2:80");
        assert_eq!(lb.balance("").unwrap(), "10.0.0.1:80");

        lb.remove("10.0.0.1:80");
        assert_eq!(lb.balance("").unwrap(), "10.0.0.2:80");
    }

    #[test]
    fn each_host_once_per_rotation() {
        let list = hosts(&["a:1", "b:1", "c:1", "d:1", "e:1"]);
        let lb = RoundRobin::new(list.clone());

        let picked: Vec<String> = (0..list.len()).map(|_| lb.balance("ignored").unwrap()).collect();
        assert_eq!(picked, list);
        assert_eq!(lb.balance("ignored").unwrap(), "a:1");
    }

    #[test]
    fn empty_registry_fails() {
        let lb = RoundRobin::new(Vec::new());
        assert_eq!(lb.balance(""), Err(BalancerError::NoHostAvailable));

        lb.add("a:1");
        lb.remove("a:1");
        assert_eq!(lb.balance(""), Err(BalancerError::NoHostAvailable));
    }

    #[test]
    fn cursor_wraps_around() {
        let lb = RoundRobin::new(hosts(&["a:1", "b:1"]));
        lb.cursor.store(u64::MAX, Ordering::Relaxed);

        assert_eq!(lb.balance("").unwrap(), "b:1");
        assert_eq!(lb.balance("").unwrap(), "a:1");
        assert_eq!(lb.balance("").unwrap(), "b:1");
    }

    #[test]
    fn concurrent_balance_and_mutation() {
        let lb = Arc::new(RoundRobin::new(hosts(&["stable:80"])));

        thread::scope(|s| {
            for _ in 0..4 {
                let lb = lb.clone();
                s.spawn(move || {
                    for _ in 0..1_000 {
                        let host = lb.balance("").expect("stable host is never removed");
                        assert!(host == "stable:80" || host.starts_with("churn-"), "{host}");
                    }
                });
            }
            for worker in 0..4 {
                let lb = lb.clone();
                s.spawn(move || {
                    for i in 0..500 {
                        let host = format!("churn-{worker}-{}:80", i % 5);
                        if i % 2 == 0 {
                            lb.add(&host);
                        } else {
                            lb.remove(&host);
                        }
                    }
                    // net effect per worker: only odd-numbered hosts stay
                    for k in 0..5 {
                        let host = format!("churn-{worker}-{k}:80");
                        if k % 2 == 1 {
                            lb.add(&host);
                        } else {
                            lb.remove(&host);
                        }
                    }
                });
            }
        });

        let mut expected = vec!["stable:80".to_string()];
        for worker in 0..4 {
            expected.push(format!("churn-{worker}-1:80"));
            expected.push(format!("churn-{worker}-3:80"));
        }
        expected.sort();

        let remaining = lb.hosts();
        let mut sorted = remaining.clone();
        sorted.sort();
        assert_eq!(sorted, expected);
        assert_eq!(remaining[0], "stable:80");
    }
}
