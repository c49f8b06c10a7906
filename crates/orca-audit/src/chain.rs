use serde::Serialize;

use crate::entry::{AuditEntry, GENESIS_PREV_HASH};

/// Result of replaying a chain in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub total: usize,
    /// Positions of entries that failed verification, ascending.
    pub compromised: Vec<usize>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.compromised.is_empty()
    }
}

/// Replay `entries` (oldest first).
///
/// An entry is compromised when its stored hash differs from the hash of its
/// stored fields, or when its `prev_hash` is not the hash recomputed for its
/// predecessor. Altering one entry's fields therefore flags that entry and
/// the one after it; a dropped or reordered entry flags its successor.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainReport {
    let mut compromised = Vec::new();
    let mut expected_prev = GENESIS_PREV_HASH.to_string();

    for (index, entry) in entries.iter().enumerate() {
        let recomputed = entry.recompute_hash();
        if recomputed != entry.entry_hash || entry.prev_hash != expected_prev {
            compromised.push(index);
        }
        expected_prev = recomputed;
    }

    ChainReport {
        total: entries.len(),
        compromised,
    }
}
