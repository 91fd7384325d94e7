//! tether-core — protocol model for the tether transport.
//!
//! Logical messages, the chunk envelope wire format, the serialization
//! codec, the key-exchange seam, and configuration. Everything here is
//! runtime-agnostic; the session machinery lives in `tether-link`.

pub mod chunk;
pub mod codec;
pub mod config;
pub mod exchange;
pub mod message;

pub use chunk::ChunkEnvelope;
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::LinkConfig;
pub use exchange::{KeyExchange, KeyExchangeError, KeyPair};
pub use message::{CheckinMessage, Message, MessageKind, ResponseMessage, TaskingMessage};
