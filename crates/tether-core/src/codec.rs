//! Serialization codec — turns logical messages into chunk envelopes
//! and back, and owns the session identity and symmetric key.
//!
//! The trait is the seam the transport programs against; `JsonCodec` is
//! the concrete wire format: `identity || json`, sealed with
//! ChaCha20-Poly1305 once a session key has been installed, then split
//! into envelopes. Rekeying mid-session changes every frame after it.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use std::sync::RwLock;

use crate::chunk::{split_payload, ChunkEnvelope, ChunkError};
use crate::message::{Message, MessageKind};

/// Sealed frame layout: 12-byte nonce, then ciphertext.
const NONCE_LEN: usize = 12;

/// Symmetric key length installed by the key exchange.
pub const SESSION_KEY_LEN: usize = 32;

pub trait Codec: Send + Sync {
    /// Serialize a message and split it into envelopes of at most
    /// `max_chunk` payload bytes. The envelope `id` is freshly assigned.
    fn encode(&self, msg: &Message, max_chunk: usize) -> Result<Vec<ChunkEnvelope>, CodecError>;

    /// Decode a reassembled payload, verifying it carries `expected`.
    fn decode(&self, payload: &[u8], expected: MessageKind) -> Result<Message, CodecError>;

    /// Install the session key negotiated by the key exchange.
    fn install_key(&self, key: &[u8]) -> Result<(), CodecError>;

    /// Adopt a peer-assigned session identity.
    fn set_identity(&self, identity: &str);

    /// Current session identity. Empty until assigned.
    fn identity(&self) -> String;
}

/// JSON codec with optional symmetric sealing.
pub struct JsonCodec {
    identity: RwLock<String>,
    key: RwLock<Option<[u8; SESSION_KEY_LEN]>>,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self {
            identity: RwLock::new(String::new()),
            key: RwLock::new(None),
        }
    }

    /// Whether a session key is currently installed.
    pub fn has_key(&self) -> bool {
        self.key.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let key = *self.key.read().unwrap_or_else(|e| e.into_inner());
        let Some(key) = key else {
            return Ok(plaintext.to_vec());
        };
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CodecError::Seal)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unseal(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let key = *self.key.read().unwrap_or_else(|e| e.into_inner());
        let Some(key) = key else {
            return Ok(payload.to_vec());
        };
        if payload.len() < NONCE_LEN {
            return Err(CodecError::Unseal);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Unseal)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for JsonCodec {
    fn encode(&self, msg: &Message, max_chunk: usize) -> Result<Vec<ChunkEnvelope>, CodecError> {
        let json = serde_json::to_vec(msg).map_err(CodecError::Serialize)?;
        let identity = self.identity();
        let mut frame = Vec::with_capacity(identity.len() + json.len());
        frame.extend_from_slice(identity.as_bytes());
        frame.extend_from_slice(&json);

        let sealed = self.seal(&frame)?;
        let id = uuid::Uuid::new_v4().to_string();
        Ok(split_payload(&id, msg.kind(), &sealed, max_chunk)?)
    }

    fn decode(&self, payload: &[u8], expected: MessageKind) -> Result<Message, CodecError> {
        let frame = self.unseal(payload)?;

        // Frames are `identity || json`; the identity prefix is absent
        // before one has been assigned.
        let json_start = frame
            .iter()
            .position(|&b| b == b'{')
            .ok_or(CodecError::MalformedFrame)?;
        if json_start > 0 {
            if let Ok(sender) = std::str::from_utf8(&frame[..json_start]) {
                tracing::trace!(sender, "frame identity prefix");
            }
        }

        let msg: Message =
            serde_json::from_slice(&frame[json_start..]).map_err(CodecError::Parse)?;
        if msg.kind() != expected {
            return Err(CodecError::UnexpectedKind {
                expected,
                got: msg.kind(),
            });
        }
        Ok(msg)
    }

    fn install_key(&self, key: &[u8]) -> Result<(), CodecError> {
        let key: [u8; SESSION_KEY_LEN] = key
            .try_into()
            .map_err(|_| CodecError::InvalidKeyLength(key.len()))?;
        *self.key.write().unwrap_or_else(|e| e.into_inner()) = Some(key);
        tracing::debug!("session key installed");
        Ok(())
    }

    fn set_identity(&self, identity: &str) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = identity.to_string();
        tracing::debug!(identity, "session identity adopted");
    }

    fn identity(&self) -> String {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to parse message: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("frame contains no message body")]
    MalformedFrame,
    #[error("expected {expected:?}, frame decoded to {got:?}")]
    UnexpectedKind {
        expected: MessageKind,
        got: MessageKind,
    },
    #[error("session key must be {SESSION_KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("failed to seal frame")]
    Seal,
    #[error("failed to unseal frame")]
    Unseal,
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}
