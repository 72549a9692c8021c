//! Per-connection proxy client session state (C3).
//!
//! A [`ProxySession`] is created the moment a transport reports a new
//! connection and destroyed when the transport reports a disconnect. All
//! mutation happens inside the engine executor (see `engine.rs`); nothing
//! here is `Send`-shared across tasks except through that single owner.

use std::net::SocketAddr;
use std::time::Instant;

use remoteproxy_core::jsonrpc::AuthenticateParams;

use crate::transport::{ClientId, OutboundHandle, TransportKind};

/// Lifecycle state of a [`ProxySession`], driving the lookup -> ready ->
/// authenticated -> tunnel-established -> relay -> teardown flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Authenticating,
    Authenticated,
    TunnelConnected,
    Disconnecting,
}

/// An in-flight `Authentication.Authenticate` call: the request id the
/// response must carry, and the params it was invoked with (remembered so
/// the success path can copy them onto the session without re-parsing).
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub request_id: i64,
    pub params: AuthenticateParams,
}

/// Per-connection session state, keyed by [`ClientId`] in the engine's
/// session table.
pub struct ProxySession {
    pub id: ClientId,
    pub peer_addr: SocketAddr,
    pub outbound: OutboundHandle,
    pub transport_kind: TransportKind,

    pub created_at: Instant,
    pub authenticated_at: Option<Instant>,
    pub tunnel_connected_at: Option<Instant>,
    /// Last instant either direction of a tunnel carried bytes; drives the
    /// idle-tunnel timer. Unused before `TunnelConnected`.
    pub last_relay_activity: Instant,

    pub state: ClientState,

    pub client_uuid: String,
    pub client_name: String,
    pub user_id: Option<String>,
    pub nonce: String,
    pub token: String,

    pub rx_bytes: u64,
    pub tx_bytes: u64,

    pub paired_peer: Option<ClientId>,
    pub pending_auth: Option<PendingAuth>,
}

impl ProxySession {
    pub fn new(
        id: ClientId,
        peer_addr: SocketAddr,
        outbound: OutboundHandle,
        transport_kind: TransportKind,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer_addr,
            outbound,
            transport_kind,
            created_at: now,
            authenticated_at: None,
            tunnel_connected_at: None,
            last_relay_activity: now,
            state: ClientState::Connected,
            client_uuid: String::new(),
            client_name: String::new(),
            user_id: None,
            nonce: String::new(),
            token: String::new(),
            rx_bytes: 0,
            tx_bytes: 0,
            paired_peer: None,
            pending_auth: None,
        }
    }

    /// `(user_id, nonce)` registry key, once authenticated. `None` before
    /// `user_id` is populated.
    pub fn registry_key(&self) -> Option<(String, String)> {
        self.user_id
            .as_ref()
            .map(|uid| (uid.clone(), self.nonce.clone()))
    }

    /// Invariant I1: a tunneled session must reference a peer.
    pub fn is_tunneled(&self) -> bool {
        self.state == ClientState::TunnelConnected && self.paired_peer.is_some()
    }
}
