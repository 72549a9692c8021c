//! Monitor observer (C8): a read-only UNIX domain socket that, on every
//! accepted connection, writes a single JSON statistics snapshot and
//! closes. Takes no input beyond the accept itself.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::stats::ServerStatistics;

/// Bind the monitor socket and spawn its accept loop. Removes a stale
/// socket file left behind by a prior unclean shutdown before binding,
/// matching the usual "unlink before bind" convention for UNIX sockets.
pub fn spawn(
    path: std::path::PathBuf,
    stats: Arc<StdMutex<ServerStatistics>>,
) -> Result<JoinHandle<()>, std::io::Error> {
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&path)?;
    info!(path = %path.display(), "monitor socket listening");

    Ok(tokio::spawn(async move {
        loop {
            let (mut stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "monitor accept failed");
                    continue;
                }
            };

            let snapshot = stats
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();

            let Ok(mut payload) = serde_json::to_vec(&snapshot) else {
                continue;
            };
            payload.push(b'\n');

            if let Err(err) = stream.write_all(&payload).await {
                debug!(error = %err, "monitor write failed");
            }
            let _ = stream.shutdown().await;
        }
    }))
}
