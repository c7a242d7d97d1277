use crate::protocol::messages::{
    AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse,
};
use crate::raft::state::{RaftRole, RaftState};

/// Decide a vote request against local state.
pub fn handle_request_vote(state: &mut RaftState, req: &VoteRequest, my_id: u64) -> VoteResponse {
    // A higher term always demotes us first.
    if req.term > state.current_term() {
        state.become_follower(req.term);
    }

    let vote_granted = if req.term < state.current_term() {
        // Stale candidate.
        false
    } else if state.voted_for().is_some() && state.voted_for() != Some(req.candidate_id) {
        // One vote per term.
        false
    } else if !state.is_log_up_to_date(req.last_log_index, req.last_log_term) {
        // Candidates missing committed entries must not win.
        false
    } else {
        state.set_voted_for(Some(req.candidate_id));
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term(),
        vote_granted,
    }
}

/// Apply a replication request from a leader: consistency check, conflict
/// truncation, append, and commit-index catch-up.
pub fn handle_append_entries(
    state: &mut RaftState,
    req: &AppendEntriesRequest,
    my_id: u64,
) -> AppendEntriesResponse {
    // A higher term always demotes us first.
    if req.term > state.current_term() {
        state.become_follower(req.term);
    }

    // Stale leader.
    if req.term < state.current_term() {
        return AppendEntriesResponse {
            term: state.current_term(),
            success: false,
            match_index: state.last_log_index(),
        };
    }

    // The sender holds leadership for this term; candidates yield to it.
    if state.role != RaftRole::Follower {
        state.become_follower(req.term);
    }
    state.leader_id = Some(req.leader_id);

    // Consistency check: our log must contain the entry the new batch hangs
    // off, with a matching term.
    if req.prev_log_index > 0 {
        match state.get_entry(req.prev_log_index) {
            None => {
                return AppendEntriesResponse {
                    term: state.current_term(),
                    success: false,
                    match_index: state.last_log_index(),
                };
            }
            Some(entry) => {
                if entry.term != req.prev_log_term {
                    // Conflicting tail; drop it and let the leader back up.
                    state.truncate_from(req.prev_log_index);
                    return AppendEntriesResponse {
                        term: state.current_term(),
                        success: false,
                        match_index: state.last_log_index(),
                    };
                }
            }
        }
    }

    // Skip entries already present with a matching term and truncate only at
    // the first real conflict. A delayed or duplicate request replaying an
    // older prefix must never shorten a log that has since grown past it.
    let first_new = req.entries.iter().find_map(|e| match state.get_entry(e.index) {
        Some(existing) if existing.term == e.term => None,
        _ => Some(e.index),
    });
    if let Some(start) = first_new {
        let tail: Vec<_> = req
            .entries
            .iter()
            .filter(|e| e.index >= start)
            .cloned()
            .collect();
        let appended = tail.len();
        state.truncate_and_append(start, tail);

        tracing::debug!(
            node_id = my_id,
            entries_appended = appended,
            new_last_index = state.last_log_index(),
            "Appended entries"
        );
    }

    // Commit anything the leader says a majority holds, capped at our tail.
    if req.leader_commit > state.commit_index {
        state.commit_index = std::cmp::min(req.leader_commit, state.last_log_index());
    }

    // Acknowledge only what this request covered; the log may extend further
    // with entries this request says nothing about.
    AppendEntriesResponse {
        term: state.current_term(),
        success: true,
        match_index: req.prev_log_index + req.entries.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::state::{LogCommand, LogEntry};

    #[test]
    fn grants_vote_to_newer_term() {
        let mut state = RaftState::new();
        state.set_current_term(1);

        let req = VoteRequest {
            term: 2,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        };

        let resp = handle_request_vote(&mut state, &req, 1);

        assert!(resp.vote_granted);
        assert_eq!(resp.term, 2);
        assert_eq!(state.voted_for(), Some(2));
    }

    #[test]
    fn rejects_vote_for_stale_term() {
        let mut state = RaftState::new();
        state.set_current_term(5);

        let req = VoteRequest {
            term: 3,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        };

        let resp = handle_request_vote(&mut state, &req, 1);

        assert!(!resp.vote_granted);
        assert_eq!(resp.term, 5);
    }

    #[test]
    fn rejects_second_vote_in_same_term() {
        let mut state = RaftState::new();
        state.set_current_term(2);
        state.set_voted_for(Some(3));

        let req = VoteRequest {
            term: 2,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        };

        assert!(!handle_request_vote(&mut state, &req, 1).vote_granted);
    }

    #[test]
    fn rejects_vote_for_outdated_log() {
        let mut state = RaftState::new();
        state.set_current_term(2);
        state.append_entry(LogCommand::Noop);

        let req = VoteRequest {
            term: 3,
            candidate_id: 2,
            last_log_index: 0, // Candidate has no logs
            last_log_term: 0,
        };

        assert!(!handle_request_vote(&mut state, &req, 1).vote_granted);
    }

    #[test]
    fn heartbeat_records_leader() {
        let mut state = RaftState::new();
        state.set_current_term(1);

        let req = AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };

        let resp = handle_append_entries(&mut state, &req, 1);

        assert!(resp.success);
        assert_eq!(resp.term, 1);
        assert_eq!(state.leader_id, Some(2));
    }

    #[test]
    fn append_entries_rejects_stale_term() {
        let mut state = RaftState::new();
        state.set_current_term(5);

        let req = AppendEntriesRequest {
            term: 3,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };

        let resp = handle_append_entries(&mut state, &req, 1);

        assert!(!resp.success);
        assert_eq!(resp.term, 5);
    }

    #[test]
    fn append_entries_advances_commit_index() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        state.append_entry(LogCommand::Noop);

        let req = AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 1,
        };

        let resp = handle_append_entries(&mut state, &req, 1);

        assert!(resp.success);
        assert_eq!(state.commit_index, 1);
    }

    #[test]
    fn append_entries_rejects_missing_prev_log() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        // Empty log

        let req = AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 5,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 0,
        };

        assert!(!handle_append_entries(&mut state, &req, 1).success);
    }

    #[test]
    fn append_entries_truncates_conflicting_tail() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        state.append_entry(LogCommand::Noop);
        state.append_entry(LogCommand::Noop);

        // Leader disagrees about the term at index 2
        let req = AppendEntriesRequest {
            term: 2,
            leader_id: 2,
            prev_log_index: 2,
            prev_log_term: 2,
            entries: vec![],
            leader_commit: 0,
        };

        let resp = handle_append_entries(&mut state, &req, 1);
        assert!(!resp.success);
        assert_eq!(state.log_len(), 1);
    }

    #[test]
    fn duplicate_append_keeps_the_committed_tail() {
        let mut state = RaftState::new();
        state.set_current_term(1);

        let entries: Vec<LogEntry> = (1..=3)
            .map(|index| LogEntry {
                term: 1,
                index,
                command: LogCommand::Noop,
            })
            .collect();
        let full = AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: entries.clone(),
            leader_commit: 3,
        };
        assert!(handle_append_entries(&mut state, &full, 1).success);
        assert_eq!(state.commit_index, 3);

        // A delayed retransmission of the first two entries arrives after
        // the log already extends past them.
        let stale = AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: entries[..2].to_vec(),
            leader_commit: 3,
        };
        let resp = handle_append_entries(&mut state, &stale, 1);

        assert!(resp.success);
        assert_eq!(resp.match_index, 2);
        assert_eq!(state.log_len(), 3);
        assert_eq!(state.commit_index, 3);
    }

    #[test]
    fn conflicting_entry_inside_the_batch_replaces_the_tail() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        state.append_entry(LogCommand::Noop);
        state.append_entry(LogCommand::Noop);

        // Index 1 matches; index 2 carries a newer term and must win.
        let req = AppendEntriesRequest {
            term: 2,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![
                LogEntry {
                    term: 1,
                    index: 1,
                    command: LogCommand::Noop,
                },
                LogEntry {
                    term: 2,
                    index: 2,
                    command: LogCommand::Noop,
                },
            ],
            leader_commit: 0,
        };
        let resp = handle_append_entries(&mut state, &req, 1);

        assert!(resp.success);
        assert_eq!(state.log_len(), 2);
        assert_eq!(state.get_entry(1).unwrap().term, 1);
        assert_eq!(state.get_entry(2).unwrap().term, 2);
    }

    #[test]
    fn candidate_steps_down_for_current_leader() {
        let mut state = RaftState::new();
        state.set_current_term(1);
        state.become_candidate(1);

        let req = AppendEntriesRequest {
            term: 5,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };

        let resp = handle_append_entries(&mut state, &req, 1);

        assert!(resp.success);
        assert_eq!(state.current_term(), 5);
        assert_eq!(state.role, RaftRole::Follower);
    }

    #[test]
    fn replicated_entries_match_leader_log() {
        let mut state = RaftState::new();
        state.set_current_term(1);

        let entries = vec![
            LogEntry {
                term: 1,
                index: 1,
                command: LogCommand::Noop,
            },
            LogEntry {
                term: 1,
                index: 2,
                command: LogCommand::Noop,
            },
        ];

        let req = AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: entries.clone(),
            leader_commit: 0,
        };

        let resp = handle_append_entries(&mut state, &req, 1);
        assert!(resp.success);
        assert_eq!(resp.match_index, 2);
        assert_eq!(state.get_entry(1), Some(&entries[0]));
        assert_eq!(state.get_entry(2), Some(&entries[1]));
    }
}
