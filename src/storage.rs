//! Persistence boundary for consensus state.
//!
//! The consensus core treats this as a durable, crash-consistent store for
//! the log tail plus the current term and vote. `MemoryStore` is the
//! reference implementation; a production store would write through to disk
//! with the same contract. Log indices are 1-based and gap-free.

use crate::raft::state::LogEntry;

pub trait LogStore: Send + Sync {
    fn current_term(&self) -> u64;
    fn set_current_term(&mut self, term: u64);

    fn voted_for(&self) -> Option<u64>;
    fn set_voted_for(&mut self, candidate: Option<u64>);

    fn append(&mut self, entry: LogEntry);
    fn entry(&self, index: u64) -> Option<&LogEntry>;
    /// All entries at or after `index` (0 means the whole log).
    fn entries_from(&self, index: u64) -> Vec<LogEntry>;
    /// Drop every entry at or after `index` (0 clears the log).
    fn truncate_from(&mut self, index: u64);

    fn last_index(&self) -> u64;
    fn last_term(&self) -> u64;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    term: u64,
    voted_for: Option<u64>,
    entries: Vec<LogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryStore {
    fn current_term(&self) -> u64 {
        self.term
    }

    fn set_current_term(&mut self, term: u64) {
        self.term = term;
    }

    fn voted_for(&self) -> Option<u64> {
        self.voted_for
    }

    fn set_voted_for(&mut self, candidate: Option<u64>) {
        self.voted_for = candidate;
    }

    fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        if index == 0 {
            return self.entries.clone();
        }
        let start = (index - 1) as usize;
        if start >= self.entries.len() {
            return Vec::new();
        }
        self.entries[start..].to_vec()
    }

    fn truncate_from(&mut self, index: u64) {
        if index == 0 {
            self.entries.clear();
            return;
        }
        let keep = (index - 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
        }
    }

    fn last_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
