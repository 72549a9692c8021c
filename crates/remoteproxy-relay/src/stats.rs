//! Statistics snapshot (part of C6/C8): a point-in-time view over the
//! engine's session table, computed on demand and handed to the monitor
//! observer. Never mutated outside the engine executor.

use serde::Serialize;

/// A snapshot of server-wide counters. Cheap to clone; serialized verbatim
/// for the monitor socket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStatistics {
    pub running: bool,
    pub uptime_secs: u64,

    pub connected: usize,
    pub authenticating: usize,
    pub authenticated: usize,
    pub tunnel_connected: usize,

    pub tunnel_count: usize,
    pub waiting_in_registry: usize,

    pub ws_connections: usize,
    pub tcp_connections: usize,

    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
}
