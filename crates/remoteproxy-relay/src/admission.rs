//! Per-IP and global connection-cap enforcement, consulted by both
//! transports (C2) on every accept before a connection is ever handed to
//! the engine.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::Admission;

/// Shared counters backing [`Admission`]. Cheap to query off the engine
/// executor: admission only touches atomics and a small mutex-guarded map,
/// never the session table itself.
pub struct AdmissionGate {
    max_connections: usize,
    max_connections_per_ip: usize,
    total: AtomicUsize,
    per_ip: Mutex<HashMap<IpAddr, usize>>,
}

impl AdmissionGate {
    pub fn new(max_connections: usize, max_connections_per_ip: usize) -> Self {
        Self {
            max_connections,
            max_connections_per_ip,
            total: AtomicUsize::new(0),
            per_ip: Mutex::new(HashMap::new()),
        }
    }

    /// Release a previously admitted slot, e.g. on disconnect. No-op if the
    /// ip was never admitted (defensive; should not happen in practice).
    pub fn release(&self, ip: IpAddr) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        let mut per_ip = self.per_ip.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(count) = per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                per_ip.remove(&ip);
            }
        }
    }

    pub fn total_connections(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Admission for AdmissionGate {
    async fn admit(&self, peer_addr: std::net::SocketAddr) -> bool {
        let ip = peer_addr.ip();
        let mut per_ip = self.per_ip.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.total.load(Ordering::SeqCst) >= self.max_connections {
            return false;
        }
        let count = per_ip.entry(ip).or_insert(0);
        if *count >= self.max_connections_per_ip {
            return false;
        }
        *count += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> std::net::SocketAddr {
        format!("{ip}:1234")
            .parse()
            .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn admits_under_cap() {
        let gate = AdmissionGate::new(2, 2);
        assert!(gate.admit(addr("10.0.0.1")).await);
        assert!(gate.admit(addr("10.0.0.2")).await);
        assert_eq!(gate.total_connections(), 2);
    }

    #[tokio::test]
    async fn denies_at_global_cap() {
        let gate = AdmissionGate::new(1, 10);
        assert!(gate.admit(addr("10.0.0.1")).await);
        assert!(!gate.admit(addr("10.0.0.2")).await);
    }

    #[tokio::test]
    async fn denies_at_per_ip_cap() {
        let gate = AdmissionGate::new(10, 1);
        assert!(gate.admit(addr("10.0.0.1")).await);
        assert!(!gate.admit(addr("10.0.0.1")).await);
        assert!(gate.admit(addr("10.0.0.2")).await);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let gate = AdmissionGate::new(1, 1);
        assert!(gate.admit(addr("10.0.0.1")).await);
        gate.release("10.0.0.1".parse().unwrap_or_else(|_| unreachable!()));
        assert!(gate.admit(addr("10.0.0.1")).await);
    }
}
