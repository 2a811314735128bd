//! Passive-port pool.
//!
//! Passive DCC reverses the connection direction: the engine listens and the
//! bot dials in. Ports for those listeners come from a configured pool so
//! firewall rules stay predictable. A [`PortLease`] returns its port to the
//! pool on drop, which ties the lease lifetime to the listener's.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::PortRange;

#[derive(Debug)]
pub struct PortPool {
    range: PortRange,
    leased: Mutex<HashSet<u16>>,
}

impl PortPool {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Lease a free port, or `None` when every port in the pool is out.
    /// No ordering guarantee; the only contract is no double-lease.
    pub fn pick(self: &Arc<Self>) -> Option<PortLease> {
        let mut leased = self.leased.lock().unwrap();
        for port in self.range.first..=self.range.last {
            if leased.insert(port) {
                return Some(PortLease {
                    port,
                    pool: Arc::clone(self),
                });
            }
        }
        None
    }

    fn release(&self, port: u16) {
        self.leased.lock().unwrap().remove(&port);
    }

    #[cfg(test)]
    fn leased_count(&self) -> usize {
        self.leased.lock().unwrap().len()
    }
}

/// A pool port borrowed for one passive listener.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<PortPool>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(first: u16, last: u16) -> Arc<PortPool> {
        Arc::new(PortPool::new(PortRange { first, last }))
    }

    #[test]
    fn never_double_leases() {
        let pool = pool(5000, 5002);
        let a = pool.pick().unwrap();
        let b = pool.pick().unwrap();
        let c = pool.pick().unwrap();
        let mut ports = vec![a.port(), b.port(), c.port()];
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 3);
        assert!(pool.pick().is_none());
    }

    #[test]
    fn release_makes_port_eligible_again() {
        let pool = pool(6000, 6000);
        let lease = pool.pick().unwrap();
        assert!(pool.pick().is_none());
        drop(lease);
        assert_eq!(pool.pick().unwrap().port(), 6000);
    }

    #[test]
    fn drop_returns_every_port() {
        let pool = pool(7000, 7004);
        let leases: Vec<_> = std::iter::from_fn(|| pool.pick()).collect();
        assert_eq!(leases.len(), 5);
        drop(leases);
        assert_eq!(pool.leased_count(), 0);
    }
}
