//! WebSocket transport: one JSON message per text/binary frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{
    Admission, ClientIdAllocator, OutboundHandle, Transport, TransportError, TransportEvent,
    TransportKind,
};

/// Listener for the websocket transport.
pub struct WsTransport {
    addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    admission: Arc<dyn Admission>,
    ids: Arc<ClientIdAllocator>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WsTransport {
    pub fn new(
        addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
        admission: Arc<dyn Admission>,
        ids: Arc<ClientIdAllocator>,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            addr,
            tls_acceptor,
            admission,
            ids,
            events_tx,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let listener =
            TcpListener::bind(self.addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: self.addr,
                    source,
                })?;

        self.running.store(true, Ordering::SeqCst);
        info!(addr = %self.addr, "WebSocket transport listening");

        let admission = Arc::clone(&self.admission);
        let ids = Arc::clone(&self.ids);
        let events_tx = self.events_tx.clone();
        let tls_acceptor = self.tls_acceptor.clone();
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => accepted,
                };
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "WebSocket accept failed");
                        continue;
                    }
                };

                if !admission.admit(peer_addr).await {
                    debug!(peer = %peer_addr, "WebSocket connection refused (admission)");
                    continue;
                }

                let id = ids.next();
                let events_tx = events_tx.clone();
                let tls_acceptor = tls_acceptor.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_connection(id, peer_addr, socket, tls_acceptor, events_tx).await
                    {
                        debug!(client_id = id, error = %err, "WebSocket connection ended");
                    }
                });
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    id: super::ClientId,
    peer_addr: SocketAddr,
    socket: TcpStream,
    tls_acceptor: Option<TlsAcceptor>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) -> anyhow::Result<()> {
    let (outbound, mut outbound_rx) = OutboundHandle::new();

    macro_rules! run_ws {
        ($stream:expr) => {{
            let ws_stream = tokio_tungstenite::accept_async($stream).await?;
            let (mut write, mut read) = ws_stream.split();

            let _ = events_tx.send(TransportEvent::Connected {
                id,
                peer_addr,
                outbound,
                kind: TransportKind::WebSocket,
            });

            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = events_tx.send(TransportEvent::Data {
                                    id,
                                    bytes: Bytes::from(text.into_bytes()),
                                });
                            }
                            Some(Ok(Message::Binary(data))) => {
                                let _ = events_tx.send(TransportEvent::Data { id, bytes: Bytes::from(data) });
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => {
                                debug!(client_id = id, error = %err, "WebSocket read error");
                                break;
                            }
                        }
                    }
                    outbound_msg = outbound_rx.recv() => {
                        match outbound_msg {
                            Some(super::OutboundMessage::Send(bytes)) => {
                                // Relayed tunnel bytes are opaque application data (I5); a lossy
                                // UTF-8 re-encode would corrupt binary payloads, so send them as
                                // a binary frame unchanged rather than as text.
                                if write.send(Message::Binary(bytes.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(super::OutboundMessage::Kill(reason)) => {
                                debug!(client_id = id, reason = %reason, "killing WebSocket connection");
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        }};
    }

    match tls_acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor.accept(socket).await?;
            run_ws!(tls_stream);
        }
        None => {
            run_ws!(socket);
        }
    }

    let _ = events_tx.send(TransportEvent::Disconnected { id });
    Ok(())
}
