//! Concurrent ordered host set.
//!
//! # Responsibilities
//! - Hold backend host identifiers in insertion order
//! - Reject duplicates on insert
//! - Give selection algorithms a consistent view under a read lock

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ordered, duplicate-free set of hosts guarded by a reader/writer lock.
///
/// The backing vector is never handed out; callers get either a copy
/// ([`snapshot`](Self::snapshot)) or a borrow scoped to the read lock
/// ([`with_hosts`](Self::with_hosts)).
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: RwLock<Vec<String>>,
}

impl HostRegistry {
    /// Create a registry from an initial host list. Later duplicates are dropped.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for host in hosts {
            let host = host.into();
            if !unique.contains(&host) {
                unique.push(host);
            }
        }
        Self {
            hosts: RwLock::new(unique),
        }
    }

    /// Append `host` unless it is already present.
    pub fn add(&self, host: &str) {
        let mut hosts = self.write();
        if hosts.iter().any(|h| h == host) {
            return;
        }
        hosts.push(host.to_string());
    }

    /// Remove `host`, keeping the relative order of the rest.
    pub fn remove(&self, host: &str) {
        let mut hosts = self.write();
        if let Some(index) = hosts.iter().position(|h| h == host) {
            hosts.remove(index);
        }
    }

    /// Copy of the current host list.
    pub fn snapshot(&self) -> Vec<String> {
        self.read().clone()
    }

    /// Run `f` against the host list while holding the read lock.
    ///
    /// Everything `f` observes belongs to a single registry state, so a size
    /// check and an index computation inside `f` cannot be split by a removal.
    pub fn with_hosts<T>(&self, f: impl FnOnce(&[String]) -> T) -> T {
        let hosts = self.read();
        f(&hosts)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        self.hosts.write().unwrap_or_else(PoisonError::into_inner)
    }
}
