//! Cross-crate scenarios for the tether transport: session
//! establishment, connection lifecycle, and framing, driven through
//! in-memory sockets instead of real TCP.

mod framing;
mod infra;
