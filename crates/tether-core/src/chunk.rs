//! Chunk envelope — the unit the link actually carries.
//!
//! A logical message too large for one frame is split into envelopes
//! sharing one `id`; the receiver reassembles by `(id, seq, total)`.
//! Envelopes are JSON on the wire with the fragment bytes base64-coded,
//! so a frame is always valid UTF-8 regardless of the payload.

use serde::{Deserialize, Serialize};

use crate::message::MessageKind;

/// One bounded-size fragment of a serialized logical message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    /// Logical message identity — groups fragments for reassembly.
    pub id: String,
    /// Zero-based fragment position.
    pub seq: u32,
    /// Total fragment count for this identity.
    pub total: u32,
    /// Kind of the message being carried, readable before reassembly.
    pub kind: MessageKind,
    /// Fragment bytes.
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

impl ChunkEnvelope {
    /// Serialize for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChunkError> {
        serde_json::to_vec(self).map_err(ChunkError::Serialize)
    }

    /// Parse a received frame.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, ChunkError> {
        serde_json::from_slice(frame).map_err(ChunkError::Parse)
    }
}

/// Split a serialized message into envelopes of at most `max_chunk` bytes.
///
/// Always produces at least one envelope so zero-length payloads still
/// travel. `total` is fixed across the set; `seq` runs 0..total.
pub fn split_payload(
    id: &str,
    kind: MessageKind,
    payload: &[u8],
    max_chunk: usize,
) -> Result<Vec<ChunkEnvelope>, ChunkError> {
    if max_chunk == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    let total = payload.len().div_ceil(max_chunk).max(1);
    let total_u32 = u32::try_from(total).map_err(|_| ChunkError::TooManyFragments(total))?;

    let mut out = Vec::with_capacity(total);
    if payload.is_empty() {
        out.push(ChunkEnvelope {
            id: id.to_string(),
            seq: 0,
            total: total_u32,
            kind,
            data: Vec::new(),
        });
        return Ok(out);
    }

    for (seq, part) in payload.chunks(max_chunk).enumerate() {
        out.push(ChunkEnvelope {
            id: id.to_string(),
            seq: seq as u32,
            total: total_u32,
            kind,
            data: part.to_vec(),
        });
    }
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("payload would need {0} fragments, exceeding the u32 sequence space")]
    TooManyFragments(usize),
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to parse envelope: {0}")]
    Parse(#[source] serde_json::Error),
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
