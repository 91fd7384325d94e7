//! Active link — one connected peer and its writer loop.
//!
//! The writer drains the send queue in FIFO order: after a completed
//! write it immediately tries the next frame, so a backlog drains
//! without waiting for another signal. Cancellation wins over a pending
//! write, which keeps teardown from deadlocking on a stalled socket.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::queue::SendQueue;
use crate::socket::ChunkSocket;

pub(crate) struct ActiveLink {
    pub(crate) socket: Arc<dyn ChunkSocket>,
    cancel: broadcast::Sender<()>,
    writer: JoinHandle<()>,
}

impl ActiveLink {
    /// Register a peer and start its writer loop. The one-connection
    /// rule upstream guarantees a single writer per queue.
    pub(crate) fn spawn(socket: Arc<dyn ChunkSocket>, outbound: Arc<SendQueue>) -> Self {
        let (cancel, cancel_rx) = broadcast::channel(1);
        let writer = tokio::spawn(writer_loop(socket.clone(), outbound, cancel_rx));
        Self {
            socket,
            cancel,
            writer,
        }
    }

    /// Close the socket, cancel the writer, and join it.
    pub(crate) async fn shutdown(self) {
        self.socket.close();
        let _ = self.cancel.send(());
        if self.writer.await.is_err() {
            tracing::warn!("writer task panicked during shutdown");
        }
    }
}

async fn writer_loop(
    socket: Arc<dyn ChunkSocket>,
    outbound: Arc<SendQueue>,
    mut cancel: broadcast::Receiver<()>,
) {
    loop {
        while let Some(frame) = outbound.pop().await {
            tokio::select! {
                _ = cancel.recv() => {
                    // The frame was never written; it belongs to the
                    // next connection.
                    outbound.requeue(frame).await;
                    tracing::debug!("writer cancelled with a write pending");
                    return;
                }
                result = socket.write(frame.clone()) => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "link write failed, writer exiting");
                        return;
                    }
                }
            }
        }
        tokio::select! {
            _ = cancel.recv() => {
                tracing::debug!("writer cancelled");
                return;
            }
            _ = outbound.wait() => {}
        }
    }
}
