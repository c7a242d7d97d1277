use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::machine::PrimitiveOp;
use crate::primitives::{Ordering, PrimitiveType};
use crate::storage::{LogStore, MemoryStore};

/// Role a node currently plays in the consensus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// Commands replicated through the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogCommand {
    /// Create (or idempotently resolve) a named primitive instance.
    CreateResource {
        name: String,
        ty: PrimitiveType,
        ordering: Ordering,
    },
    /// Explicitly destroy a named primitive instance.
    DeleteResource { name: String },
    /// Mutate a primitive instance.
    Apply { resource: u64, op: PrimitiveOp },
    /// Single-change membership: add a node to the cluster.
    AddMember(u64),
    /// Single-change membership: remove a node from the cluster.
    RemoveMember(u64),
    /// Appended by a fresh leader so earlier-term entries become committable.
    Noop,
}

/// A single entry in the Raft log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: LogCommand,
}

/// Consensus state for one node. Persistent fields (term, vote, log) live
/// behind the `LogStore` boundary and survive restarts with it.
///
/// Safety rests on a handful of rules spread across this module and
/// `rpc.rs`: one vote per term (`voted_for`), vote only for candidates with
/// an up-to-date log (`is_log_up_to_date`), truncate follower logs only at a
/// proven conflict, and commit only entries from the leader's current term.
/// Together they guarantee a single leader per term and that committed
/// entries survive every future election.
pub struct RaftState {
    store: Box<dyn LogStore>,

    // Volatile, rebuilt from the log after a restart
    pub commit_index: u64,
    pub last_applied: u64,

    // Leader-only replication cursors, reset on every election win
    pub next_index: HashMap<u64, u64>,
    pub match_index: HashMap<u64, u64>,

    pub role: RaftRole,
    pub leader_id: Option<u64>,
    pub votes_received: u64,
}

impl RaftState {
    pub fn new() -> Self {
        Self::with_store(Box::new(MemoryStore::new()))
    }

    /// Recover state from a store; a restarted node resumes with its
    /// persisted term, vote, and log tail.
    pub fn with_store(store: Box<dyn LogStore>) -> Self {
        Self {
            store,
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            role: RaftRole::Follower,
            leader_id: None,
            votes_received: 0,
        }
    }

    pub fn current_term(&self) -> u64 {
        self.store.current_term()
    }

    pub fn set_current_term(&mut self, term: u64) {
        self.store.set_current_term(term);
    }

    pub fn voted_for(&self) -> Option<u64> {
        self.store.voted_for()
    }

    pub fn set_voted_for(&mut self, candidate: Option<u64>) {
        self.store.set_voted_for(candidate);
    }

    pub fn last_log_index(&self) -> u64 {
        self.store.last_index()
    }

    pub fn last_log_term(&self) -> u64 {
        self.store.last_term()
    }

    pub fn log_len(&self) -> usize {
        self.store.len()
    }

    /// Entry at a 1-based log index.
    pub fn get_entry(&self, index: u64) -> Option<&LogEntry> {
        self.store.entry(index)
    }

    /// Every entry at or after the given index.
    pub fn get_entries_from(&self, start_index: u64) -> Vec<LogEntry> {
        self.store.entries_from(start_index)
    }

    /// Append a new command to the log, returning its index.
    pub fn append_entry(&mut self, command: LogCommand) -> u64 {
        let index = self.last_log_index() + 1;
        self.store.append(LogEntry {
            term: self.current_term(),
            index,
            command,
        });
        index
    }

    /// Replace the log tail: drop everything at or after `from_index`, then
    /// append the replacement entries.
    pub fn truncate_and_append(&mut self, from_index: u64, entries: Vec<LogEntry>) {
        self.store.truncate_from(from_index);
        for entry in entries {
            self.store.append(entry);
        }
    }

    /// Drop conflicting entries at and after the index.
    pub fn truncate_from(&mut self, index: u64) {
        self.store.truncate_from(index);
    }

    /// Whether a candidate's log is at least as up-to-date as ours: a later
    /// last term wins, otherwise the same last term with an index no lower
    /// than ours.
    pub fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        let our_last_term = self.last_log_term();
        let our_last_index = self.last_log_index();

        last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index)
    }

    /// Step down to follower at the given term, clearing the vote.
    pub fn become_follower(&mut self, term: u64) {
        self.role = RaftRole::Follower;
        self.set_current_term(term);
        self.set_voted_for(None);
        self.votes_received = 0;
    }

    /// Enter a new term as candidate, voting for ourselves.
    pub fn become_candidate(&mut self, my_id: u64) {
        self.role = RaftRole::Candidate;
        let term = self.current_term() + 1;
        self.set_current_term(term);
        self.set_voted_for(Some(my_id));
        self.votes_received = 1;
        self.leader_id = None;
    }

    /// Take leadership, resetting the per-peer replication cursors so every
    /// follower is probed from the current log end.
    pub fn become_leader(&mut self, my_id: u64, peer_ids: &[u64]) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(my_id);

        let last_log_index = self.last_log_index();
        self.next_index.clear();
        self.match_index.clear();
        for &peer_id in peer_ids {
            self.next_index.insert(peer_id, last_log_index + 1);
            self.match_index.insert(peer_id, 0);
        }
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn fresh_state_starts_as_follower_at_term_zero() {
        let state = RaftState::new();
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term(), 0);
        assert_eq!(state.voted_for(), None);
        assert_eq!(state.log_len(), 0);
    }

    #[test]
    fn candidacy_bumps_the_term_and_self_votes() {
        let mut state = RaftState::new();
        state.become_candidate(1);

        assert_eq!(state.role, RaftRole::Candidate);
        assert_eq!(state.current_term(), 1);
        assert_eq!(state.voted_for(), Some(1));
        assert_eq!(state.votes_received, 1);
        assert_eq!(state.leader_id, None);
    }

    #[test]
    fn leadership_resets_replication_cursors() {
        let mut state = RaftState::new();
        state.become_candidate(1);
        state.become_leader(1, &[2, 3]);

        assert_eq!(state.role, RaftRole::Leader);
        assert_eq!(state.leader_id, Some(1));
        assert_eq!(state.next_index.get(&2), Some(&1));
        assert_eq!(state.next_index.get(&3), Some(&1));
        assert_eq!(state.match_index.get(&2), Some(&0));
        assert_eq!(state.match_index.get(&3), Some(&0));
    }

    #[test]
    fn stepping_down_clears_the_vote() {
        let mut state = RaftState::new();
        state.become_candidate(1);
        state.become_follower(5);

        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term(), 5);
        assert_eq!(state.voted_for(), None);
        assert_eq!(state.votes_received, 0);
    }

    #[test]
    fn appends_stamp_the_current_term() {
        let mut state = RaftState::new();
        state.set_current_term(1);

        let index = state.append_entry(LogCommand::Noop);
        assert_eq!(index, 1);
        assert_eq!(state.get_entry(1).unwrap().term, 1);

        state.set_current_term(2);
        let index = state.append_entry(LogCommand::Noop);
        assert_eq!(index, 2);

        assert_eq!(state.last_log_index(), 2);
        assert_eq!(state.last_log_term(), 2);
    }

    #[test]
    fn entries_from_returns_the_tail() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        state.append_entry(LogCommand::Noop);
        state.set_current_term(2);
        state.append_entry(LogCommand::Noop);
        state.set_current_term(3);
        state.append_entry(LogCommand::Noop);

        let entries = state.get_entries_from(2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 2);
        assert_eq!(entries[1].index, 3);

        assert_eq!(state.get_entries_from(0).len(), 3);
        assert!(state.get_entries_from(10).is_empty());
    }

    #[test]
    fn truncate_and_append_replaces_the_tail() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        state.append_entry(LogCommand::Noop);
        state.append_entry(LogCommand::Noop);
        state.append_entry(LogCommand::Noop);

        let replacement = vec![
            LogEntry {
                term: 2,
                index: 2,
                command: LogCommand::Noop,
            },
            LogEntry {
                term: 2,
                index: 3,
                command: LogCommand::Noop,
            },
        ];
        state.truncate_and_append(2, replacement);

        assert_eq!(state.log_len(), 3);
        assert_eq!(state.get_entry(1).unwrap().term, 1);
        assert_eq!(state.get_entry(2).unwrap().term, 2);
        assert_eq!(state.get_entry(3).unwrap().term, 2);
    }

    #[test]
    fn up_to_date_compares_last_term_then_index() {
        let mut state = RaftState::new();

        // An empty log is never ahead of anyone.
        assert!(state.is_log_up_to_date(0, 0));
        assert!(state.is_log_up_to_date(1, 1));

        state.set_current_term(1);
        state.append_entry(LogCommand::Noop);
        state.set_current_term(2);
        state.append_entry(LogCommand::Noop);

        // Ours now ends at (index 2, term 2).
        assert!(state.is_log_up_to_date(1, 3)); // later term
        assert!(state.is_log_up_to_date(2, 2)); // equal
        assert!(state.is_log_up_to_date(3, 2)); // same term, longer
        assert!(!state.is_log_up_to_date(5, 1)); // earlier term
        assert!(!state.is_log_up_to_date(1, 2)); // same term, shorter
    }

    #[test]
    fn restart_recovers_persisted_consensus_state() {
        let mut store = MemoryStore::new();
        store.set_current_term(3);
        store.set_voted_for(Some(2));
        store.append(LogEntry {
            term: 3,
            index: 1,
            command: LogCommand::Noop,
        });

        let state = RaftState::with_store(Box::new(store));
        assert_eq!(state.current_term(), 3);
        assert_eq!(state.voted_for(), Some(2));
        assert_eq!(state.last_log_index(), 1);
        // Volatile fields start fresh.
        assert_eq!(state.commit_index, 0);
        assert_eq!(state.role, RaftRole::Follower);
    }
}
