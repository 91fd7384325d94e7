//! TCP socket layer — length-delimited framing over one accepted
//! stream at a time.
//!
//! The accept loop feeds the transport's lifecycle callbacks; the
//! transport's one-connection rule decides whether an accepted stream
//! is kept (rejected sockets are closed before a reader is spawned, so
//! their teardown never touches the active link).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::socket::ChunkSocket;
use crate::transport::LinkTransport;

/// One peer's write half behind the `ChunkSocket` seam.
pub struct TcpChunkSocket {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    open: AtomicBool,
    closed: Notify,
}

impl TcpChunkSocket {
    pub fn new(write_half: OwnedWriteHalf, max_frame_bytes: usize) -> Self {
        Self {
            writer: Mutex::new(FramedWrite::new(write_half, frame_codec(max_frame_bytes))),
            open: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    /// Resolves once `close` has been called.
    pub(crate) async fn wait_closed(&self) {
        loop {
            let notified = self.closed.notified();
            if !self.is_open() {
                return;
            }
            notified.await;
        }
    }
}

impl ChunkSocket for TcpChunkSocket {
    fn write(&self, frame: Bytes) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "socket closed",
                ));
            }
            let mut writer = self.writer.lock().await;
            writer.send(frame).await
        })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closed.notify_waiters();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// Accept peers forever, handing each to the transport. At most one
/// survives the lifecycle check at a time.
pub async fn accept_loop(transport: Arc<LinkTransport>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        tracing::info!(%peer, "inbound peer connection");

        let max_frame = transport.max_frame_bytes();
        let (read_half, write_half) = stream.into_split();
        let socket = Arc::new(TcpChunkSocket::new(write_half, max_frame));
        let registered: Arc<dyn ChunkSocket> = socket.clone();
        transport.on_peer_connected(registered.clone()).await;
        if !socket.is_open() {
            // Rejected — a link is already active. Dropping the read
            // half closes the stream.
            continue;
        }

        let transport = transport.clone();
        tokio::spawn(async move {
            read_loop(&transport, &socket, read_half, max_frame, peer).await;
            // Scoped to this socket: by the time the read task exits, a
            // new peer may already hold the slot.
            transport.on_peer_disconnected(&registered).await;
        });
    }
}

async fn read_loop(
    transport: &LinkTransport,
    socket: &TcpChunkSocket,
    read_half: OwnedReadHalf,
    max_frame: usize,
    peer: std::net::SocketAddr,
) {
    let mut frames = FramedRead::new(read_half, frame_codec(max_frame));
    loop {
        tokio::select! {
            _ = socket.wait_closed() => {
                tracing::debug!(%peer, "socket closed locally");
                return;
            }
            next = frames.next() => match next {
                Some(Ok(frame)) => transport.on_frame(&frame).await,
                Some(Err(e)) => {
                    tracing::warn!(%peer, error = %e, "frame read failed");
                    return;
                }
                None => {
                    tracing::info!(%peer, "peer closed connection");
                    return;
                }
            }
        }
    }
}
