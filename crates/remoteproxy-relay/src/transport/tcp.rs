//! Raw TLS-TCP transport: newline-delimited JSON frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::{
    Admission, ClientIdAllocator, OutboundHandle, Transport, TransportError, TransportEvent,
    TransportKind, MAX_FRAME_BYTES,
};

/// Listener for the raw-TCP transport. Frames are UTF-8 JSON terminated by
/// a single `\n`; a connection whose unterminated buffered prefix exceeds
/// [`MAX_FRAME_BYTES`] is dropped.
pub struct TcpTransport {
    addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    admission: Arc<dyn Admission>,
    ids: Arc<ClientIdAllocator>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TcpTransport {
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
impl Transport for TcpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let listener =
            TcpListener::bind(self.addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: self.addr,
                    source,
                })?;

        self.running.store(true, Ordering::SeqCst);
        info!(addr = %self.addr, "TCP transport listening");

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
                        warn!(error = %err, "TCP accept failed");
                        continue;
                    }
                };

                if !admission.admit(peer_addr).await {
                    debug!(peer = %peer_addr, "TCP connection refused (admission)");
                    continue;
                }

                let id = ids.next();
                let events_tx = events_tx.clone();
                let tls_acceptor = tls_acceptor.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_connection(id, peer_addr, socket, tls_acceptor, events_tx).await
                    {
                        debug!(client_id = id, error = %err, "TCP connection ended");
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
) -> std::io::Result<()> {
    let (outbound, mut outbound_rx) = OutboundHandle::new();
    let _ = events_tx.send(TransportEvent::Connected {
        id,
        peer_addr,
        outbound,
        kind: TransportKind::Tcp,
    });

    macro_rules! run_framed {
        ($stream:expr) => {{
            let (mut read_half, mut write_half) = tokio::io::split($stream);
            let mut buf = BytesMut::with_capacity(4096);
            let mut read_buf = [0u8; 4096];

            loop {
                tokio::select! {
                    read_result = read_half.read(&mut read_buf) => {
                        match read_result {
                            Ok(0) => break,
                            Ok(n) => {
                                buf.extend_from_slice(&read_buf[..n]);
                                while let Some(newline_at) = buf.iter().position(|b| *b == b'\n') {
                                    let frame = buf.split_to(newline_at + 1);
                                    let _ = events_tx.send(TransportEvent::Data {
                                        id,
                                        bytes: Bytes::copy_from_slice(&frame[..frame.len() - 1]),
                                    });
                                }
                                if buf.len() > MAX_FRAME_BYTES {
                                    warn!(client_id = id, "TCP frame exceeded size limit, closing");
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    outbound_msg = outbound_rx.recv() => {
                        match outbound_msg {
                            Some(super::OutboundMessage::Send(bytes)) => {
                                if write_half.write_all(&bytes).await.is_err() {
                                    break;
                                }
                                if write_half.write_all(b"\n").await.is_err() {
                                    break;
                                }
                            }
                            Some(super::OutboundMessage::Kill(reason)) => {
                                debug!(client_id = id, reason = %reason, "killing TCP connection");
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
            run_framed!(tls_stream);
        }
        None => {
            run_framed!(socket);
        }
    }

    let _ = events_tx.send(TransportEvent::Disconnected { id });
    Ok(())
}
