//! Transport-agnostic connection layer.
//!
//! Both the websocket and raw-TCP listeners satisfy the same [`Transport`]
//! contract and funnel [`TransportEvent`]s onto one channel so the engine
//! executor can treat every connection uniformly regardless of origin.

pub mod tcp;
pub mod ws;

pub use tcp::TcpTransport;
pub use ws::WsTransport;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Maximum bytes buffered for an unterminated TCP frame before the
/// connection is dropped.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Identifies one accepted connection, unique for the lifetime of the process.
pub type ClientId = u64;

/// Hands out unique [`ClientId`]s across all transports.
#[derive(Default)]
pub struct ClientIdAllocator(AtomicU64);

impl ClientIdAllocator {
    pub fn next(&self) -> ClientId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A capability, given to the engine when a connection is accepted, to push
/// outbound data or terminate the connection. Cloning shares the same
/// underlying connection.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

enum OutboundMessage {
    Send(Bytes),
    Kill(String),
}

impl OutboundHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue bytes for delivery. Non-blocking; silently dropped if the
    /// connection has already terminated.
    pub fn send(&self, bytes: Bytes) {
        let _ = self.tx.send(OutboundMessage::Send(bytes));
    }

    /// Forcibly close the connection.
    pub fn kill(&self, reason: impl Into<String>) {
        let _ = self.tx.send(OutboundMessage::Kill(reason.into()));
    }
}

/// Which concrete transport originated a connection. Carried alongside each
/// connection for per-transport statistics (C8) and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Tcp,
}

/// Events a transport reports to the engine executor.
pub enum TransportEvent {
    Connected {
        id: ClientId,
        peer_addr: SocketAddr,
        outbound: OutboundHandle,
        kind: TransportKind,
    },
    Data {
        id: ClientId,
        bytes: Bytes,
    },
    Disconnected {
        id: ClientId,
    },
}

/// Consulted by a transport on every accepted connection, before any
/// [`TransportEvent::Connected`] is emitted, to enforce connection caps.
#[async_trait]
pub trait Admission: Send + Sync {
    async fn admit(&self, peer_addr: SocketAddr) -> bool;
}

/// Errors a transport can fail to start with.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS configuration error: {0}")]
    Tls(#[from] crate::tls::TlsConfigError),
}

/// Shared lifecycle contract for the websocket and raw-TCP listeners.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind and begin accepting connections, spawning a task per connection.
    /// Returns once the listener is bound (accept loop runs in the background).
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop accepting new connections. Does not forcibly close existing ones;
    /// the engine kills individual sessions via their [`OutboundHandle`].
    async fn stop(&self);

    /// Whether the listener is currently accepting connections.
    fn running(&self) -> bool;
}
