//! Chunk reassembly — groups envelopes by message identity and emits
//! each logical payload exactly once.
//!
//! Fragments may arrive in any order and duplicates are idempotent.
//! Lookup-or-create is atomic per identity: the map shard lock covers
//! the whole check-then-act, so two racing fragments of an unseen
//! identity create exactly one entry.

use std::collections::BTreeMap;

use dashmap::DashMap;

use tether_core::chunk::ChunkEnvelope;
use tether_core::message::MessageKind;

/// A fully reassembled payload, ready for the codec.
#[derive(Debug)]
pub struct CompletedMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

struct AssemblyEntry {
    /// Expected fragment count, fixed by the first envelope seen.
    total: u32,
    kind: MessageKind,
    fragments: BTreeMap<u32, Vec<u8>>,
    dispatched: bool,
}

impl AssemblyEntry {
    fn new(total: u32, kind: MessageKind) -> Self {
        Self {
            total,
            kind,
            fragments: BTreeMap::new(),
            dispatched: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.len() as u32 == self.total
    }

    fn assemble(&mut self) -> Vec<u8> {
        let mut payload = Vec::new();
        for data in std::mem::take(&mut self.fragments).into_values() {
            payload.extend_from_slice(&data);
        }
        payload
    }
}

/// Tracks in-flight assemblies keyed by logical message identity.
pub struct ChunkAssembler {
    entries: DashMap<String, AssemblyEntry>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Fold one envelope in. Returns the reassembled message when this
    /// envelope completes it; each identity completes at most once.
    pub fn on_chunk(&self, env: ChunkEnvelope) -> Option<CompletedMessage> {
        if env.total == 0 {
            tracing::warn!(id = %env.id, "dropping envelope with zero total");
            return None;
        }

        let completed = {
            let mut entry = self
                .entries
                .entry(env.id.clone())
                .or_insert_with(|| AssemblyEntry::new(env.total, env.kind));

            // The first-seen total governs; a disagreeing fragment is
            // either a retransmit artifact or garbage.
            if env.total != entry.total {
                tracing::warn!(
                    id = %env.id,
                    expected = entry.total,
                    got = env.total,
                    "fragment disagrees on total, keeping first-seen value"
                );
            }
            if env.seq >= entry.total {
                tracing::warn!(id = %env.id, seq = env.seq, total = entry.total, "fragment sequence out of range, dropping");
                return None;
            }

            entry.fragments.insert(env.seq, env.data);
            if entry.is_complete() && !entry.dispatched {
                entry.dispatched = true;
                Some(CompletedMessage {
                    kind: entry.kind,
                    payload: entry.assemble(),
                })
            } else {
                None
            }
        };

        if let Some(done) = completed {
            self.entries.remove(&env.id);
            tracing::trace!(id = %env.id, kind = ?done.kind, bytes = done.payload.len(), "message reassembled");
            return Some(done);
        }
        None
    }

    /// Abandon every in-flight assembly. Called on disconnect: no
    /// further fragments for these identities will ever arrive.
    pub fn discard_all(&self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }

    /// Number of identities currently being assembled.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}
