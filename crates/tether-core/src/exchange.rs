//! Key-exchange seam.
//!
//! Asymmetric key generation and session-key decryption are supplied by
//! the embedding agent — the transport only drives the protocol. The
//! handshake calls `generate` once, sends the exported public key, and
//! uses the returned pair to open the peer's sealed session key.

/// Factory for one-shot asymmetric key pairs.
pub trait KeyExchange: Send + Sync {
    fn generate(&self) -> Result<Box<dyn KeyPair>, KeyExchangeError>;
}

/// A generated key pair, alive for one handshake attempt.
pub trait KeyPair: Send + Sync {
    /// Exported public key in a transport-ready encoding.
    fn public_key(&self) -> String;

    /// Locally chosen identifier for this exchange attempt.
    fn session_id(&self) -> String;

    /// Open a session key sealed with our public key.
    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, KeyExchangeError>;
}

/// Placeholder backend for deployments that run without an encrypted
/// exchange. Any attempt to use it fails the handshake immediately.
pub struct NullKeyExchange;

impl KeyExchange for NullKeyExchange {
    fn generate(&self) -> Result<Box<dyn KeyPair>, KeyExchangeError> {
        Err(KeyExchangeError::Unavailable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyExchangeError {
    #[error("no key-exchange backend configured")]
    Unavailable,
    #[error("key generation failed: {0}")]
    Generate(String),
    #[error("failed to open sealed session key: {0}")]
    Decrypt(String),
}
