//! Run-scoped memory of previously seen gaps.
//!
//! Answers one question per gap per round: has something like this been
//! seen in an earlier round and not yet resolved? Entries are append-only.
//! Resolving an entry removes it from future matching, so the same key
//! extracted later is a fresh occurrence with its own `first_seen_round`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::Gap;

/// Answer from `record_and_check`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceCheck {
    /// Matched an unresolved entry from an earlier round above the threshold
    pub is_persistent: bool,
    /// Memory key the gap was matched against (its own key when new)
    pub matched_key: String,
    /// Similarity to the matched entry, in [0, 1]
    pub similarity: f64,
    /// First round the matched occurrence was seen
    pub first_seen_round: u32,
    /// Whether the matched occurrence was already handed to escalation
    pub already_escalated: bool,
}

impl PersistenceCheck {
    /// Rounds elapsed since the occurrence was first seen.
    pub fn age(&self, round: u32) -> u32 {
        round.saturating_sub(self.first_seen_round)
    }
}

/// Contract for gap persistence. Implementations choose the similarity
/// measure; callers only compare it against the threshold.
pub trait SimilarityMemory: Send + Sync {
    fn record_and_check(&mut self, gap: &Gap, round: u32) -> PersistenceCheck;

    /// First-seen round of the unresolved occurrence stored under `key`.
    fn first_seen(&self, key: &str) -> Option<u32>;

    fn mark_escalated(&mut self, key: &str);

    fn mark_resolved(&mut self, key: &str);

    /// Number of stored occurrences, resolved or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub first_seen_round: u32,
    pub last_seen_round: u32,
    pub escalated: bool,
    pub resolved: bool,
}

/// Keyword-overlap memory: bigram Sørensen–Dice on gap keys.
#[derive(Debug, Clone)]
pub struct KeywordOverlapMemory {
    threshold: f64,
    entries: Vec<MemoryEntry>,
}

impl KeywordOverlapMemory {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    fn similarity(a: &str, b: &str) -> f64 {
        if a == b {
            1.0
        } else {
            strsim::sorensen_dice(a, b)
        }
    }

    /// Best unresolved match for `key`. Ties go to the oldest entry.
    fn best_match(&self, key: &str) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.resolved {
                continue;
            }
            let sim = Self::similarity(key, &entry.key);
            match best {
                Some((_, current)) if sim <= current => {}
                _ => best = Some((idx, sim)),
            }
        }
        best
    }

    fn unresolved_mut(&mut self, key: &str) -> Option<&mut MemoryEntry> {
        self.entries.iter_mut().find(|e| !e.resolved && e.key == key)
    }
}

impl SimilarityMemory for KeywordOverlapMemory {
    fn record_and_check(&mut self, gap: &Gap, round: u32) -> PersistenceCheck {
        if let Some((idx, sim)) = self.best_match(&gap.key) {
            if sim > self.threshold {
                let entry = &mut self.entries[idx];
                let is_persistent = entry.first_seen_round < round;
                entry.last_seen_round = entry.last_seen_round.max(round);
                debug!(
                    gap = %gap.key,
                    matched = %entry.key,
                    similarity = sim,
                    first_seen = entry.first_seen_round,
                    is_persistent,
                    "gap matched memory"
                );
                return PersistenceCheck {
                    is_persistent,
                    matched_key: entry.key.clone(),
                    similarity: sim,
                    first_seen_round: entry.first_seen_round,
                    already_escalated: entry.escalated,
                };
            }
        }

        let similarity = self.best_match(&gap.key).map(|(_, s)| s).unwrap_or(0.0);
        self.entries.push(MemoryEntry {
            key: gap.key.clone(),
            first_seen_round: round,
            last_seen_round: round,
            escalated: false,
            resolved: false,
        });
        debug!(gap = %gap.key, round, "new gap occurrence recorded");
        PersistenceCheck {
            is_persistent: false,
            matched_key: gap.key.clone(),
            similarity,
            first_seen_round: round,
            already_escalated: false,
        }
    }

    fn first_seen(&self, key: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| !e.resolved && e.key == key)
            .map(|e| e.first_seen_round)
    }

    fn mark_escalated(&mut self, key: &str) {
        if let Some(entry) = self.unresolved_mut(key) {
            entry.escalated = true;
        }
    }

    fn mark_resolved(&mut self, key: &str) {
        if let Some(entry) = self.unresolved_mut(key) {
            entry.resolved = true;
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
