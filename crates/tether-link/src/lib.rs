//! tether-link — single-peer chunked message transport.
//!
//! One peer connection at a time, an optional encrypted key exchange
//! gating all steady-state traffic, bounded-size chunking with
//! order-tolerant reassembly, and FIFO queues that decouple socket I/O
//! from the agent's own produce/consume loops.

pub mod assembly;
pub mod bridge;
mod handshake;
mod link;
pub mod net;
pub mod queue;
pub mod socket;
pub mod transport;

pub use assembly::{ChunkAssembler, CompletedMessage};
pub use bridge::AgentBridge;
pub use queue::{InboundQueue, RecvError, SendQueue};
pub use socket::ChunkSocket;
pub use transport::{LinkError, LinkTransport};
