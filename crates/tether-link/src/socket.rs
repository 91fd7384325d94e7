//! Socket seam — what the transport needs from a connected peer.
//!
//! Byte delimiting happens below this trait; the transport only ever
//! hands over whole frames. `net` provides the TCP implementation;
//! tests substitute in-memory sockets.

use bytes::Bytes;
use futures::future::BoxFuture;

pub trait ChunkSocket: Send + Sync {
    /// Write one frame. Resolves when the frame has been handed to the
    /// underlying stream, or fails if the socket is no longer usable.
    fn write(&self, frame: Bytes) -> BoxFuture<'_, std::io::Result<()>>;

    /// Close the socket. Idempotent; pending writes fail afterwards.
    fn close(&self);

    fn is_open(&self) -> bool;
}
