//! Bounded, append-only record of decoded envelopes.
//!
//! Entries keep arrival order. When full, appending evicts the oldest entry.
//! Each entry gets a sequence number that keeps increasing across reconnects,
//! so a consumer can tell whether it has missed anything.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use selfrep_types::Envelope;

/// Capacity used when none is configured.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// One recorded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Position in the session's total arrival order, starting at 1.
    pub sequence: u64,
    /// When the envelope was decoded.
    pub received_at: DateTime<Utc>,
    /// The envelope itself.
    pub envelope: Envelope,
}

/// Ring buffer of the most recent envelopes.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// An empty buffer holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
            next_sequence: 1,
        }
    }

    /// Record an envelope, evicting the oldest entry when full.
    ///
    /// Returns the sequence number assigned to it.
    pub fn append(&mut self, envelope: Envelope) -> u64 {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.entries.push_back(HistoryEntry {
            sequence,
            received_at: Utc::now(),
            envelope,
        });
        sequence
    }

    /// The most recently appended entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// An owned copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded (or everything was evicted).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries held.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total envelopes ever appended, including evicted ones.
    pub const fn total_appended(&self) -> u64 {
        self.next_sequence.saturating_sub(1)
    }
}
