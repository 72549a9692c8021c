//! Engine lifecycle (C7) and the engine executor (C6's registry/relay logic
//! lives here too, since both are mutations of the same session table).
//!
//! A single `tokio` task -- the "engine executor" -- owns the session table
//! and the tunnel registry. Every transport, every authenticator call, and
//! the 1-second tick communicate with it exclusively through [`EngineEvent`]
//! sent over an unbounded channel; nothing outside this module ever touches
//! `HashMap<ClientId, ProxySession>` directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use remoteproxy_core::config::ProxyConfiguration;
use remoteproxy_core::jsonrpc::{
    AuthenticateParams, AuthenticationError, RpcNotification, RpcResponse,
    TunnelEstablishedParams,
};

use crate::admission::AdmissionGate;
use crate::auth::{AuthFailureReason, AuthReply, Authenticator};
use crate::client::{ClientState, PendingAuth, ProxySession};
use crate::dispatch::{self, DispatchAction};
use crate::monitor;
use crate::registry::TunnelRegistry;
use crate::stats::ServerStatistics;
use crate::tls;
use crate::transport::{
    ClientId, ClientIdAllocator, Transport, TransportError, TransportEvent, TransportKind,
};
use crate::transport::{TcpTransport, WsTransport};

/// Errors that can prevent the engine from starting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] tls::TlsConfigError),
    #[error("monitor socket error: {0}")]
    Monitor(#[from] std::io::Error),
}

/// Outcome of a previously begun asynchronous authenticate call.
enum AuthOutcome {
    TimedOut,
    Completed(AuthReply),
}

/// Everything the engine executor reacts to.
enum EngineEvent {
    Transport(TransportEvent),
    AuthOutcome {
        id: ClientId,
        request_id: i64,
        outcome: AuthOutcome,
    },
    Tick,
    Shutdown,
}

/// Resources created by a `start()` call, torn down by the matching `stop()`.
struct EngineHandle {
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    executor: JoinHandle<()>,
    transports: Vec<Arc<dyn Transport>>,
    monitor: Option<JoinHandle<()>>,
}

/// The engine: owns a configuration, wires C1-C6, and drives start/stop.
///
/// Modeled as an explicit value constructed by the entry point rather than
/// a process-wide singleton (§9): tests construct as many independent
/// `Engine`s as they like.
pub struct Engine {
    config: ProxyConfiguration,
    authenticator: Arc<dyn Authenticator>,
    admission: Arc<AdmissionGate>,
    ids: Arc<ClientIdAllocator>,
    running: Arc<AtomicBool>,
    stats: Arc<StdMutex<ServerStatistics>>,
    handle: StdMutex<Option<EngineHandle>>,
}

impl Engine {
    pub fn new(config: ProxyConfiguration, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        let admission = Arc::new(AdmissionGate::new(
            config.max_connections,
            config.max_connections_per_ip,
        ));
        Arc::new(Self {
            config,
            authenticator,
            admission,
            ids: Arc::new(ClientIdAllocator::default()),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StdMutex::new(ServerStatistics::default())),
            handle: StdMutex::new(None),
        })
    }

    pub fn config(&self) -> &ProxyConfiguration {
        &self.config
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current statistics snapshot, as last computed by the 1-second tick.
    pub fn stats(&self) -> ServerStatistics {
        self.stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Start listeners and the engine executor. A no-op (with a warning) if
    /// already running, per §4.7.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("engine already running, start() is a no-op");
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let dev_cert_dir = std::env::temp_dir().join("remoteproxy-dev-tls");
        let ws_acceptor = tls::build_tls_acceptor(&self.config.ws_tls, &dev_cert_dir)?;
        let tcp_acceptor = tls::build_tls_acceptor(&self.config.tcp_tls, &dev_cert_dir)?;

        let ws_transport: Arc<dyn Transport> = Arc::new(WsTransport::new(
            self.config.ws_listen_addr,
            ws_acceptor,
            Arc::clone(&self.admission) as Arc<dyn crate::transport::Admission>,
            Arc::clone(&self.ids),
            transport_tx(&events_tx),
        ));
        let tcp_transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(
            self.config.tcp_listen_addr,
            tcp_acceptor,
            Arc::clone(&self.admission) as Arc<dyn crate::transport::Admission>,
            Arc::clone(&self.ids),
            transport_tx(&events_tx),
        ));

        ws_transport.start().await?;
        tcp_transport.start().await?;

        let tick_events_tx = events_tx.clone();
        let tick_running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                if !tick_running.load(Ordering::SeqCst) {
                    break;
                }
                if tick_events_tx.send(EngineEvent::Tick).is_err() {
                    break;
                }
            }
        });

        let monitor_handle = if self.config.monitor_socket_path.as_os_str().is_empty() {
            None
        } else {
            Some(monitor::spawn(
                self.config.monitor_socket_path.clone(),
                Arc::clone(&self.stats),
            )?)
        };

        let executor = tokio::spawn(run_executor(
            events_rx,
            self.config.clone(),
            Arc::clone(&self.authenticator),
            Arc::clone(&self.admission),
            events_tx.clone(),
            Arc::clone(&self.stats),
        ));

        *self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(EngineHandle {
            events_tx,
            executor,
            transports: vec![ws_transport, tcp_transport],
            monitor: monitor_handle,
        });

        info!(
            ws_addr = %self.config.ws_listen_addr,
            tcp_addr = %self.config.tcp_listen_addr,
            "engine started"
        );
        Ok(())
    }

    /// Stop all listeners, tear down every session with
    /// `"Server shutting down"`, and clear the registry. A no-op if already
    /// stopped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(handle) = handle else { return };

        for transport in &handle.transports {
            transport.stop().await;
        }

        let _ = handle.events_tx.send(EngineEvent::Shutdown);
        let _ = handle.executor.await;

        if let Some(monitor) = handle.monitor {
            monitor.abort();
        }

        info!("engine stopped");
    }
}

fn transport_tx(
    events_tx: &mpsc::UnboundedSender<EngineEvent>,
) -> mpsc::UnboundedSender<TransportEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TransportEvent>();
    let events_tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if events_tx.send(EngineEvent::Transport(event)).is_err() {
                break;
            }
        }
    });
    tx
}

#[allow(clippy::too_many_arguments)]
async fn run_executor(
    mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    config: ProxyConfiguration,
    authenticator: Arc<dyn Authenticator>,
    admission: Arc<AdmissionGate>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    stats: Arc<StdMutex<ServerStatistics>>,
) {
    let mut sessions: HashMap<ClientId, ProxySession> = HashMap::new();
    let mut registry = TunnelRegistry::new();
    let started_at = Instant::now();
    let call_timeout = Duration::from_secs(config.call_timeout_secs);

    while let Some(event) = events_rx.recv().await {
        match event {
            EngineEvent::Transport(TransportEvent::Connected {
                id,
                peer_addr,
                outbound,
                kind,
            }) => {
                sessions.insert(id, ProxySession::new(id, peer_addr, outbound, kind));
                debug!(client_id = id, peer = %peer_addr, "client connected");
            }
            EngineEvent::Transport(TransportEvent::Data { id, bytes }) => {
                handle_data(
                    &mut sessions,
                    &config,
                    &authenticator,
                    call_timeout,
                    &events_tx,
                    id,
                    bytes,
                );
            }
            EngineEvent::Transport(TransportEvent::Disconnected { id }) => {
                handle_disconnect(&mut sessions, &mut registry, &admission, id);
            }
            EngineEvent::AuthOutcome {
                id,
                request_id,
                outcome,
            } => {
                handle_auth_outcome(&mut sessions, &mut registry, id, request_id, outcome);
            }
            EngineEvent::Tick => {
                handle_tick(&mut sessions, &config);
                let snapshot = compute_stats(&sessions, &registry, true, started_at);
                *stats
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot;
            }
            EngineEvent::Shutdown => {
                for session in sessions.values() {
                    session.outbound.kill("Server shutting down");
                }
                sessions.clear();
                registry = TunnelRegistry::new();
                *stats
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                    ServerStatistics::default();
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_data(
    sessions: &mut HashMap<ClientId, ProxySession>,
    config: &ProxyConfiguration,
    authenticator: &Arc<dyn Authenticator>,
    call_timeout: Duration,
    events_tx: &mpsc::UnboundedSender<EngineEvent>,
    id: ClientId,
    bytes: Bytes,
) {
    let Some(session) = sessions.get(&id) else {
        return;
    };

    if session.state == ClientState::TunnelConnected {
        relay_bytes(sessions, id, bytes);
        return;
    }

    let action = dispatch::dispatch(session, &config.server_name, &bytes);
    match action {
        DispatchAction::Reply(resp) => {
            if let Some(session) = sessions.get(&id) {
                send_response(session, resp);
            }
        }
        DispatchAction::ReplyAndKill(resp) => {
            if let Some(session) = sessions.get_mut(&id) {
                send_response(session, resp);
                session.outbound.kill("Protocol error");
                session.state = ClientState::Disconnecting;
            }
        }
        DispatchAction::BeginAuthenticate {
            request_id,
            params,
        } => {
            let Some(session) = sessions.get_mut(&id) else {
                return;
            };
            session.state = ClientState::Authenticating;
            session.pending_auth = Some(PendingAuth {
                request_id,
                params: params.clone(),
            });
            spawn_auth_call(
                id,
                request_id,
                params,
                session.peer_addr,
                Arc::clone(authenticator),
                call_timeout,
                events_tx.clone(),
            );
        }
    }
}

fn relay_bytes(sessions: &mut HashMap<ClientId, ProxySession>, id: ClientId, bytes: Bytes) {
    let Some(peer_id) = sessions.get(&id).and_then(|s| s.paired_peer) else {
        return;
    };
    let Some(peer_outbound) = sessions.get(&peer_id).map(|p| p.outbound.clone()) else {
        return;
    };

    let len = bytes.len() as u64;
    let now = Instant::now();
    peer_outbound.send(bytes);

    if let Some(session) = sessions.get_mut(&id) {
        session.rx_bytes += len;
        session.last_relay_activity = now;
    }
    if let Some(peer) = sessions.get_mut(&peer_id) {
        peer.tx_bytes += len;
        peer.last_relay_activity = now;
    }
}

fn spawn_auth_call(
    id: ClientId,
    request_id: i64,
    params: AuthenticateParams,
    peer_addr: SocketAddr,
    authenticator: Arc<dyn Authenticator>,
    call_timeout: Duration,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
) {
    tokio::spawn(async move {
        let outcome = tokio::select! {
            reply = authenticator.authenticate(&params.token, &params.nonce, &params.name, &params.uuid, peer_addr) => {
                AuthOutcome::Completed(reply)
            }
            () = tokio::time::sleep(call_timeout) => AuthOutcome::TimedOut,
        };
        let _ = events_tx.send(EngineEvent::AuthOutcome {
            id,
            request_id,
            outcome,
        });
    });
}

fn handle_auth_outcome(
    sessions: &mut HashMap<ClientId, ProxySession>,
    registry: &mut TunnelRegistry,
    id: ClientId,
    request_id: i64,
    outcome: AuthOutcome,
) {
    let Some(session) = sessions.get_mut(&id) else {
        // Client already disconnected; late replies are discarded (§5).
        return;
    };
    if session.state != ClientState::Authenticating {
        return;
    }
    let Some(pending) = session.pending_auth.clone() else {
        return;
    };
    if pending.request_id != request_id {
        return;
    }

    match outcome {
        AuthOutcome::TimedOut => {
            send_response(session, RpcResponse::error(request_id, "Command timed out"));
            session.outbound.kill("Command timed out");
            session.state = ClientState::Disconnecting;
            session.pending_auth = None;
        }
        AuthOutcome::Completed(AuthReply::Success { user_id }) => {
            session.user_id = Some(user_id);
            session.nonce = pending.params.nonce.clone();
            session.token = pending.params.token.clone();
            session.client_name = pending.params.name.clone();
            session.client_uuid = pending.params.uuid.clone();
            session.state = ClientState::Authenticated;
            session.authenticated_at = Some(Instant::now());
            session.pending_auth = None;
            send_response(
                session,
                RpcResponse::success(
                    request_id,
                    json!({ "authenticationError": AuthenticationError::NoError }),
                ),
            );
            try_pair(sessions, registry, id);
        }
        AuthOutcome::Completed(AuthReply::Failure(reason)) => {
            let wire_error = failure_to_wire(reason);
            send_response(
                session,
                RpcResponse::success(request_id, json!({ "authenticationError": wire_error })),
            );
            session.outbound.kill("Authentication failed");
            session.state = ClientState::Disconnecting;
            session.pending_auth = None;
        }
    }
}

fn failure_to_wire(reason: AuthFailureReason) -> AuthenticationError {
    match reason {
        AuthFailureReason::BadToken | AuthFailureReason::Unauthorized => {
            AuthenticationError::AuthenticationError
        }
        AuthFailureReason::AuthServerNotResponding => {
            AuthenticationError::AuthenticationServerNotResponding
        }
        AuthFailureReason::Aborted => AuthenticationError::ProxyError,
        AuthFailureReason::Unknown => AuthenticationError::Unknown,
    }
}

/// Attempt to pair `candidate` against a waiting client of equal
/// `(userId, nonce, token)` (I4). On success transitions both to
/// `TunnelConnected` and notifies both; otherwise parks `candidate` as a
/// new waiter.
fn try_pair(
    sessions: &mut HashMap<ClientId, ProxySession>,
    registry: &mut TunnelRegistry,
    candidate: ClientId,
) {
    let Some((user_id, nonce, token)) = sessions.get(&candidate).and_then(|s| {
        s.user_id
            .clone()
            .map(|uid| (uid, s.nonce.clone(), s.token.clone()))
    }) else {
        return;
    };

    match registry.find_and_remove_match(&user_id, &nonce, &token, candidate) {
        Some(waiter_id) => {
            let now = Instant::now();
            if let Some(waiter) = sessions.get_mut(&waiter_id) {
                waiter.paired_peer = Some(candidate);
                waiter.state = ClientState::TunnelConnected;
                waiter.tunnel_connected_at = Some(now);
                waiter.last_relay_activity = now;
            }
            if let Some(cand) = sessions.get_mut(&candidate) {
                cand.paired_peer = Some(waiter_id);
                cand.state = ClientState::TunnelConnected;
                cand.tunnel_connected_at = Some(now);
                cand.last_relay_activity = now;
            }
            notify_tunnel_established(sessions, waiter_id, candidate);
            notify_tunnel_established(sessions, candidate, waiter_id);
        }
        None => {
            registry.insert(&user_id, &nonce, &token, candidate);
        }
    }
}

fn notify_tunnel_established(
    sessions: &HashMap<ClientId, ProxySession>,
    to: ClientId,
    about: ClientId,
) {
    let (Some(target), Some(peer)) = (sessions.get(&to), sessions.get(&about)) else {
        return;
    };
    let params = TunnelEstablishedParams {
        client_name: peer.client_name.clone(),
        client_uuid: peer.client_uuid.clone(),
    };
    let Ok(params_value) = serde_json::to_value(params) else {
        return;
    };
    let notification = RpcNotification::new("Authentication.TunnelEstablished", params_value);
    if let Ok(bytes) = serde_json::to_vec(&notification) {
        target.outbound.send(Bytes::from(bytes));
    }
}

fn handle_disconnect(
    sessions: &mut HashMap<ClientId, ProxySession>,
    registry: &mut TunnelRegistry,
    admission: &AdmissionGate,
    id: ClientId,
) {
    let Some(session) = sessions.remove(&id) else {
        return;
    };
    admission.release(session.peer_addr.ip());

    if session.state == ClientState::Authenticated {
        if let Some(user_id) = &session.user_id {
            registry.remove(user_id, &session.nonce, id);
        }
    }

    if let Some(peer_id) = session.paired_peer {
        if let Some(peer) = sessions.get_mut(&peer_id) {
            peer.paired_peer = None;
            peer.outbound.kill("Tunnel closed by peer");
            peer.state = ClientState::Disconnecting;
        }
    }

    debug!(client_id = id, "client disconnected");
}

/// Evict sessions whose timers expired, without per-connection scheduler
/// entries (§4.7): the 1-second tick sweeps the whole table instead.
fn handle_tick(sessions: &mut HashMap<ClientId, ProxySession>, config: &ProxyConfiguration) {
    let now = Instant::now();
    let auth_timeout = Duration::from_secs(config.auth_timeout_secs);
    let idle_timeout = Duration::from_secs(config.relay_inactivity_timeout_secs);

    for session in sessions.values_mut() {
        match session.state {
            ClientState::Connected | ClientState::Authenticating => {
                if now.duration_since(session.created_at) > auth_timeout {
                    session.outbound.kill("Authentication timed out");
                    session.state = ClientState::Disconnecting;
                }
            }
            ClientState::TunnelConnected => {
                if !idle_timeout.is_zero()
                    && now.duration_since(session.last_relay_activity) > idle_timeout
                {
                    session.outbound.kill("Tunnel idle timeout");
                    session.state = ClientState::Disconnecting;
                }
            }
            ClientState::Authenticated | ClientState::Disconnecting => {}
        }
    }
}

fn compute_stats(
    sessions: &HashMap<ClientId, ProxySession>,
    registry: &TunnelRegistry,
    running: bool,
    started_at: Instant,
) -> ServerStatistics {
    let mut stats = ServerStatistics {
        running,
        uptime_secs: started_at.elapsed().as_secs(),
        waiting_in_registry: registry.waiting_count(),
        ..ServerStatistics::default()
    };

    for session in sessions.values() {
        match session.state {
            ClientState::Connected => stats.connected += 1,
            ClientState::Authenticating => stats.authenticating += 1,
            ClientState::Authenticated => stats.authenticated += 1,
            ClientState::TunnelConnected => stats.tunnel_connected += 1,
            ClientState::Disconnecting => {}
        }
        match session.transport_kind {
            TransportKind::WebSocket => stats.ws_connections += 1,
            TransportKind::Tcp => stats.tcp_connections += 1,
        }
        stats.rx_bytes_total += session.rx_bytes;
        stats.tx_bytes_total += session.tx_bytes;
    }
    stats.tunnel_count = stats.tunnel_connected / 2;

    stats
}

fn send_response(session: &ProxySession, response: RpcResponse) {
    if let Ok(bytes) = serde_json::to_vec(&response) {
        session.outbound.send(Bytes::from(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::OutboundHandle;

    fn session(id: ClientId, kind: TransportKind) -> ProxySession {
        let (outbound, _rx) = OutboundHandle::new();
        ProxySession::new(
            id,
            "127.0.0.1:1".parse().unwrap_or_else(|_| unreachable!()),
            outbound,
            kind,
        )
    }

    #[test]
    fn try_pair_parks_first_client_as_waiter() {
        let mut sessions = HashMap::new();
        let mut s = session(1, TransportKind::Tcp);
        s.user_id = Some("user".to_string());
        s.nonce = "n".to_string();
        s.token = "t".to_string();
        sessions.insert(1, s);

        let mut registry = TunnelRegistry::new();
        try_pair(&mut sessions, &mut registry, 1);

        assert_eq!(registry.waiting_count(), 1);
        assert_eq!(sessions[&1].state, ClientState::Connected);
    }

    #[test]
    fn try_pair_matches_second_client_with_same_token() {
        let mut sessions = HashMap::new();
        for id in [1, 2] {
            let mut s = session(id, TransportKind::Tcp);
            s.user_id = Some("user".to_string());
            s.nonce = "n".to_string();
            s.token = "t".to_string();
            s.state = ClientState::Authenticated;
            sessions.insert(id, s);
        }

        let mut registry = TunnelRegistry::new();
        try_pair(&mut sessions, &mut registry, 1);
        try_pair(&mut sessions, &mut registry, 2);

        assert_eq!(registry.waiting_count(), 0);
        assert_eq!(sessions[&1].state, ClientState::TunnelConnected);
        assert_eq!(sessions[&2].state, ClientState::TunnelConnected);
        assert_eq!(sessions[&1].paired_peer, Some(2));
        assert_eq!(sessions[&2].paired_peer, Some(1));
    }

    #[test]
    fn try_pair_does_not_match_different_tokens() {
        let mut sessions = HashMap::new();
        let mut a = session(1, TransportKind::Tcp);
        a.user_id = Some("user".to_string());
        a.nonce = "n".to_string();
        a.token = "tok-a".to_string();
        sessions.insert(1, a);

        let mut b = session(2, TransportKind::Tcp);
        b.user_id = Some("user".to_string());
        b.nonce = "n".to_string();
        b.token = "tok-b".to_string();
        sessions.insert(2, b);

        let mut registry = TunnelRegistry::new();
        try_pair(&mut sessions, &mut registry, 1);
        try_pair(&mut sessions, &mut registry, 2);

        assert_eq!(registry.waiting_count(), 2);
        assert_eq!(sessions[&1].state, ClientState::Connected);
        assert_eq!(sessions[&2].state, ClientState::Connected);
    }

    #[test]
    fn disconnect_tears_down_paired_peer() {
        let mut sessions = HashMap::new();
        let mut a = session(1, TransportKind::Tcp);
        a.state = ClientState::TunnelConnected;
        a.paired_peer = Some(2);
        sessions.insert(1, a);

        let mut b = session(2, TransportKind::Tcp);
        b.state = ClientState::TunnelConnected;
        b.paired_peer = Some(1);
        sessions.insert(2, b);

        let admission = AdmissionGate::new(10, 10);
        let mut registry = TunnelRegistry::new();
        handle_disconnect(&mut sessions, &mut registry, &admission, 1);

        assert!(!sessions.contains_key(&1));
        assert!(sessions[&2].paired_peer.is_none());
        assert_eq!(sessions[&2].state, ClientState::Disconnecting);
    }

    #[test]
    fn tick_evicts_stale_connected_sessions() {
        let mut sessions = HashMap::new();
        let mut s = session(1, TransportKind::Tcp);
        s.created_at = Instant::now() - Duration::from_secs(100);
        sessions.insert(1, s);

        let mut config = ProxyConfiguration::default();
        config.developer_mode = true;
        config.auth_timeout_secs = 1;

        handle_tick(&mut sessions, &config);
        assert_eq!(sessions[&1].state, ClientState::Disconnecting);
    }
}
