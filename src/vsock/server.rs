//! Frame server for guest-initiated vsock connections.
//!
//! Firecracker forwards a guest connection to CID 2 / port N to the host
//! Unix socket `{uds_path}_N`. Each accepted connection gets its own task
//! that reads frames until the guest goes away or the stream desyncs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::error::{FrameError, ListenError};
use crate::protocol::{read_frame, GuestCommand, Tag};

/// Listens on the side-channel socket and answers `HELO` handshakes.
pub struct VsockFrameServer {
    socket_path: PathBuf,
    listener: UnixListener,
    /// Pre-encoded `HELO` response frame, shared read-only by all connections
    hello_reply: Arc<[u8]>,
}

impl VsockFrameServer {
    /// Bind the listener at `socket_path`. Must be called inside a Tokio runtime.
    pub fn bind(socket_path: PathBuf, command: &GuestCommand) -> Result<Self, ListenError> {
        let reply = command.to_frame().map_err(ListenError::Handshake)?;
        let hello_reply: Arc<[u8]> = reply.encode().map_err(ListenError::ReplyFrame)?.into();

        // Remove stale socket (ignore errors if not exists)
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path).map_err(|source| ListenError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        info!(target: "vsock", socket = %socket_path.display(), "frame server listening");

        Ok(Self {
            socket_path,
            listener,
            hello_reply,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `cancel` fires.
    ///
    /// A failed accept ends the server with `ListenError::Accept`. Errors on
    /// individual connections only end that connection. Outstanding
    /// connection tasks are aborted before this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ListenError> {
        let mut connections: JoinSet<()> = JoinSet::new();
        let mut next_conn_id = 0u64;

        let result = loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            next_conn_id += 1;
                            let conn_id = next_conn_id;
                            let hello_reply = Arc::clone(&self.hello_reply);

                            info!(target: "vsock", conn = conn_id, "guest connected");

                            connections.spawn(async move {
                                match handle_connection(stream, &hello_reply).await {
                                    Ok(frames) => {
                                        info!(target: "vsock", conn = conn_id, frames, "guest disconnected");
                                    }
                                    Err(e) => {
                                        warn!(target: "vsock", conn = conn_id, error = ?e, "dropping connection");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(target: "vsock", error = %e, "failed to accept connection");
                            break Err(ListenError::Accept(e));
                        }
                    }
                }

                Some(joined) = connections.join_next() => {
                    if let Err(e) = joined {
                        error!(target: "vsock", error = %e, "connection task panicked");
                    }
                }

                _ = cancel.cancelled() => {
                    info!(target: "vsock", "cancellation requested, shutting down frame server");
                    break Ok(());
                }
            }
        };

        connections.shutdown().await;
        info!(target: "vsock", "frame server stopped");
        result
    }

    /// Run on a background task; the returned handle owns its shutdown.
    pub fn spawn(self) -> FrameServerHandle {
        let cancel = CancellationToken::new();
        let socket_path = self.socket_path.clone();
        let task = tokio::spawn(self.run(cancel.clone()));
        FrameServerHandle {
            socket_path,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

impl Drop for VsockFrameServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Serve one connection: read frames and dispatch on their tag.
///
/// Returns the number of frames handled when the guest closes cleanly.
async fn handle_connection(mut stream: UnixStream, hello_reply: &[u8]) -> Result<u64, FrameError> {
    let mut frames = 0u64;

    while let Some(frame) = read_frame(&mut stream).await? {
        frames += 1;
        debug!(target: "vsock", tag = %frame.tag, len = frame.payload.len(), "frame received");

        match frame.tag {
            Tag::HELO => {
                stream.write_all(hello_reply).await?;
                stream.flush().await?;
                info!(target: "vsock", "sent guest command");
            }
            other => {
                debug!(target: "vsock", tag = %other, "ignoring frame with unknown tag");
            }
        }
    }

    Ok(frames)
}

/// A frame server running in the background.
///
/// Dropping the handle cancels the server, so it never outlives its owner.
pub struct FrameServerHandle {
    socket_path: PathBuf,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    task: JoinHandle<Result<(), ListenError>>,
}

impl FrameServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Resolves only if the server stops on its own. Cancel-safe.
    ///
    /// Do not call `shutdown` after this has resolved.
    pub async fn stopped(&mut self) -> ListenError {
        match (&mut self.task).await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => ListenError::Stopped,
            Err(e) => ListenError::Task(e),
        }
    }

    /// Stop accepting, abort open connections, and wait for the task.
    pub async fn shutdown(self) -> Result<(), ListenError> {
        self.cancel.cancel();
        self.task.await?
    }
}
