use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::machine::{OpResult, StateMachine};
use crate::protocol::messages::{
    AppendEntriesRequest, AppendEntriesResponse, ClusterView, CommandOutcome, CommandRequest,
    CommandResponse, ConsistencyLevel, JoinRequest, JoinResponse, LeaveRequest, LeaveResponse,
    QueryOp, QueryOutcome, QueryRequest, QueryResponse, Rejection, VoteRequest, VoteResponse,
};
use crate::protocol::ClientProtocol;
use crate::raft::rpc::{handle_append_entries, handle_request_vote};
use crate::raft::state::{LogCommand, RaftRole, RaftState};
use crate::raft::timer::random_election_timeout;
use crate::storage::LogStore;

/// Timeout for a single peer round trip during elections and replication.
const PEER_RPC_TIMEOUT: Duration = Duration::from_millis(100);

/// Inbound work for the consensus event loop.
#[derive(Debug)]
pub enum RaftMessage {
    /// Request to replicate a command; the sender is resolved once the
    /// entry commits and applies, or rejected immediately if not leader.
    Propose {
        command: LogCommand,
        response_tx: oneshot::Sender<Result<CommandOutcome, Rejection>>,
    },
    /// Force an immediate election, regardless of the timeout.
    TriggerElection,
}

struct PendingCommand {
    term: u64,
    response_tx: oneshot::Sender<Result<CommandOutcome, Rejection>>,
}

/// The main Raft node that coordinates consensus and owns the resource
/// state machine it applies committed entries to.
pub struct RaftNode {
    pub id: u64,
    pub state: Arc<RwLock<RaftState>>,
    config: NodeConfig,
    peers: Arc<RwLock<HashSet<u64>>>,
    protocol: Arc<dyn ClientProtocol>,
    machine: Arc<RwLock<StateMachine>>,
    message_tx: mpsc::Sender<RaftMessage>,
    last_heartbeat: Arc<RwLock<Instant>>,
    /// Last successful append-entries acknowledgment per peer, used for the
    /// linearizable read lease check.
    peer_acks: Arc<RwLock<HashMap<u64, Instant>>>,
    /// Waiters for commands this node appended as leader, keyed by index.
    pending: Arc<Mutex<HashMap<u64, PendingCommand>>>,
    commit_tx: Arc<watch::Sender<u64>>,
}

impl RaftNode {
    pub fn new(
        config: NodeConfig,
        protocol: Arc<dyn ClientProtocol>,
    ) -> (Self, mpsc::Receiver<RaftMessage>) {
        Self::with_store(config, protocol, Box::new(crate::storage::MemoryStore::new()))
    }

    /// Construct a node over an existing store, recovering its persisted
    /// term, vote, and log tail.
    pub fn with_store(
        config: NodeConfig,
        protocol: Arc<dyn ClientProtocol>,
        store: Box<dyn LogStore>,
    ) -> (Self, mpsc::Receiver<RaftMessage>) {
        let (message_tx, message_rx) = mpsc::channel(100);
        let (commit_tx, _) = watch::channel(0u64);

        let node = Self {
            id: config.node_id,
            state: Arc::new(RwLock::new(RaftState::with_store(store))),
            peers: Arc::new(RwLock::new(config.peers.iter().copied().collect())),
            config,
            protocol,
            machine: Arc::new(RwLock::new(StateMachine::new())),
            message_tx,
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
            peer_acks: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            commit_tx: Arc::new(commit_tx),
        };

        (node, message_rx)
    }

    /// Sender half of the event loop's inbox.
    pub fn message_sender(&self) -> mpsc::Sender<RaftMessage> {
        self.message_tx.clone()
    }

    /// Subscribe to commit index advances.
    pub fn subscribe_commits(&self) -> watch::Receiver<u64> {
        self.commit_tx.subscribe()
    }

    /// Drive the node until shutdown: proposals, applies, elections, and
    /// (as leader) the heartbeat tick.
    pub async fn run(&self, mut message_rx: mpsc::Receiver<RaftMessage>, shutdown: CancellationToken) {
        let mut election_timeout = random_election_timeout(
            self.config.election_timeout_min_ms,
            self.config.election_timeout_max_ms,
        );
        let mut heartbeat_interval = tokio::time::interval(Duration::from_millis(
            self.config.heartbeat_interval_ms,
        ));
        let mut commit_rx = self.commit_tx.subscribe();

        loop {
            let role = self.state.read().await.role;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = self.id, "Raft loop shutting down");
                    break;
                }

                Some(msg) = message_rx.recv() => {
                    match msg {
                        RaftMessage::Propose { command, response_tx } => {
                            self.handle_propose(command, response_tx).await;
                        }
                        RaftMessage::TriggerElection => {
                            self.start_election().await;
                        }
                    }
                }

                // Apply entries as the commit index advances
                changed = commit_rx.changed() => {
                    if changed.is_ok() {
                        self.apply_committed().await;
                    }
                }

                // Election timer, armed while not leading
                _ = tokio::time::sleep(election_timeout), if role != RaftRole::Leader => {
                    let elapsed = self.last_heartbeat.read().await.elapsed();
                    if elapsed >= election_timeout {
                        tracing::info!(
                            node_id = self.id,
                            elapsed_ms = elapsed.as_millis(),
                            "No leader contact, campaigning"
                        );
                        self.start_election().await;
                    }
                    election_timeout = random_election_timeout(
                        self.config.election_timeout_min_ms,
                        self.config.election_timeout_max_ms,
                    );
                }

                // Replication tick, leaders only
                _ = heartbeat_interval.tick(), if role == RaftRole::Leader => {
                    self.send_heartbeats().await;
                }
            }
        }
    }

    /// Campaign for leadership in a fresh term.
    async fn start_election(&self) {
        let peer_ids: Vec<u64> = self.peers.read().await.iter().copied().collect();

        let mut state = self.state.write().await;
        state.become_candidate(self.id);
        let term = state.current_term();
        let last_log_index = state.last_log_index();
        let last_log_term = state.last_log_term();
        let total_nodes = peer_ids.len() + 1;
        let majority = (total_nodes / 2) + 1;
        drop(state);

        tracing::info!(node_id = self.id, term, "Campaigning");

        let req = VoteRequest {
            term,
            candidate_id: self.id,
            last_log_index,
            last_log_term,
        };

        // Starts at one for our own vote.
        let mut vote_count = 1u64;

        for peer_id in &peer_ids {
            match timeout(PEER_RPC_TIMEOUT, self.protocol.vote(*peer_id, req.clone())).await {
                Ok(Ok(resp)) => {
                    if resp.term > term {
                        self.state.write().await.become_follower(resp.term);
                        return;
                    }
                    if resp.vote_granted {
                        vote_count += 1;
                        tracing::debug!(
                            node_id = self.id,
                            peer_id,
                            votes = vote_count,
                            "Vote granted"
                        );
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(peer_id, error = %e, "Vote request failed");
                }
                Err(_) => {
                    tracing::warn!(peer_id, "Vote request timed out");
                }
            }
        }

        // Only take leadership if still the same candidacy; a concurrent
        // AppendEntries may have demoted us while votes were in flight.
        let mut state = self.state.write().await;
        if state.role == RaftRole::Candidate && state.current_term() == term {
            state.votes_received = vote_count;
            if vote_count >= majority as u64 {
                state.become_leader(self.id, &peer_ids);
                // Commit a no-op so entries from prior terms become
                // committable under the current-term rule.
                state.append_entry(LogCommand::Noop);
                let notify = advance_commit_index(&mut state);
                tracing::info!(node_id = self.id, term, votes = vote_count, "Became leader");
                drop(state);
                if let Some(commit) = notify {
                    self.commit_tx.send_replace(commit);
                }
            } else {
                tracing::debug!(
                    node_id = self.id,
                    term,
                    votes = vote_count,
                    needed = majority,
                    "Lost the election"
                );
            }
        }
    }

    /// Send heartbeats (with any outstanding entries) to all followers.
    async fn send_heartbeats(&self) {
        let state = self.state.read().await;
        if state.role != RaftRole::Leader {
            return;
        }

        let term = state.current_term();
        let commit_index = state.commit_index;
        let next_index = state.next_index.clone();
        drop(state);

        let peer_ids: Vec<u64> = self.peers.read().await.iter().copied().collect();

        for peer_id in peer_ids {
            let peer_next_index = *next_index.get(&peer_id).unwrap_or(&1);
            let prev_log_index = peer_next_index.saturating_sub(1);

            let (prev_log_term, entries) = {
                let state = self.state.read().await;
                let prev_log_term = if prev_log_index == 0 {
                    0
                } else {
                    state.get_entry(prev_log_index).map(|e| e.term).unwrap_or(0)
                };
                (prev_log_term, state.get_entries_from(peer_next_index))
            };

            let req = AppendEntriesRequest {
                term,
                leader_id: self.id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: commit_index,
            };

            let protocol = Arc::clone(&self.protocol);
            let state = Arc::clone(&self.state);
            let peer_acks = Arc::clone(&self.peer_acks);
            let commit_tx = Arc::clone(&self.commit_tx);

            // One task per follower so a slow peer never delays the rest.
            tokio::spawn(async move {
                match timeout(PEER_RPC_TIMEOUT, protocol.append_entries(peer_id, req)).await {
                    Ok(Ok(resp)) => {
                        let mut state = state.write().await;

                        if resp.term > state.current_term() {
                            state.become_follower(resp.term);
                            return;
                        }

                        if state.role == RaftRole::Leader && resp.success {
                            // Acks for older requests may arrive late; the
                            // replication cursors only ever move forward.
                            let matched = state
                                .match_index
                                .get(&peer_id)
                                .copied()
                                .unwrap_or(0)
                                .max(resp.match_index);
                            state.match_index.insert(peer_id, matched);
                            state.next_index.insert(peer_id, matched + 1);
                            peer_acks.write().await.insert(peer_id, Instant::now());

                            if let Some(commit) = advance_commit_index(&mut state) {
                                tracing::debug!(commit_index = commit, "Commit index advanced");
                                drop(state);
                                commit_tx.send_replace(commit);
                            }
                        } else if state.role == RaftRole::Leader && !resp.success {
                            // Back up one entry; the next tick retries from there.
                            let current = state.next_index.get(&peer_id).copied().unwrap_or(1);
                            if current > 1 {
                                state.next_index.insert(peer_id, current - 1);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::trace!(peer_id, error = %e, "AppendEntries failed");
                    }
                    Err(_) => {
                        tracing::trace!(peer_id, "AppendEntries timed out");
                    }
                }
            });
        }
    }

    /// Handle a proposal from the event loop (leader only).
    async fn handle_propose(
        &self,
        command: LogCommand,
        response_tx: oneshot::Sender<Result<CommandOutcome, Rejection>>,
    ) {
        {
            let state = self.state.read().await;
            if state.role != RaftRole::Leader {
                let _ = response_tx.send(Err(Rejection::NotLeader {
                    leader_hint: state.leader_id,
                }));
                return;
            }
        }

        // A leader cut off from its quorum must not accept writes it can
        // never commit; the client retries elsewhere.
        if !self.quorum_is_recent().await {
            let _ = response_tx.send(Err(Rejection::NoQuorum));
            return;
        }

        let mut state = self.state.write().await;
        if state.role != RaftRole::Leader {
            let _ = response_tx.send(Err(Rejection::NotLeader {
                leader_hint: state.leader_id,
            }));
            return;
        }

        let index = state.append_entry(command);
        let term = state.current_term();
        tracing::debug!(index, term, "Appended command to log");

        self.pending
            .lock()
            .await
            .insert(index, PendingCommand { term, response_tx });

        // A single-node cluster has its majority immediately.
        let notify = advance_commit_index(&mut state);
        drop(state);
        if let Some(commit) = notify {
            self.commit_tx.send_replace(commit);
        }
    }

    /// Apply every committed-but-unapplied entry to the state machine, in
    /// strict index order, and resolve any pending client waiters.
    async fn apply_committed(&self) {
        let mut resolved = Vec::new();
        {
            let mut state = self.state.write().await;
            while state.last_applied < state.commit_index {
                let index = state.last_applied + 1;
                let Some(entry) = state.get_entry(index).cloned() else {
                    break;
                };
                state.last_applied = index;

                let value = match &entry.command {
                    LogCommand::AddMember(node_id) => {
                        if *node_id != self.id {
                            self.peers.write().await.insert(*node_id);
                            if state.role == RaftRole::Leader {
                                let next = state.last_log_index() + 1;
                                state.next_index.insert(*node_id, next);
                                state.match_index.insert(*node_id, 0);
                            }
                        }
                        Ok(OpResult::None)
                    }
                    LogCommand::RemoveMember(node_id) => {
                        self.peers.write().await.remove(node_id);
                        state.next_index.remove(node_id);
                        state.match_index.remove(node_id);
                        Ok(OpResult::None)
                    }
                    command => self.machine.write().await.apply(command),
                };
                resolved.push((index, entry.term, value));
            }
        }

        if resolved.is_empty() {
            return;
        }

        let mut pending = self.pending.lock().await;
        for (index, term, value) in resolved {
            if let Some(waiter) = pending.remove(&index) {
                if waiter.term == term {
                    let _ = waiter.response_tx.send(Ok(CommandOutcome { index, value }));
                } else {
                    // A different leader's entry landed at our index; the
                    // original proposal was lost.
                    let _ = waiter
                        .response_tx
                        .send(Err(Rejection::NotLeader { leader_hint: None }));
                }
            }
        }
    }

    /// Decide an inbound vote request.
    pub async fn handle_vote_request(&self, req: VoteRequest) -> VoteResponse {
        let mut state = self.state.write().await;
        let response = handle_request_vote(&mut state, &req, self.id);
        drop(state);

        // Granting a vote counts as leader contact for the election timer.
        if response.vote_granted {
            *self.last_heartbeat.write().await = Instant::now();
        }

        response
    }

    /// Accept replicated entries from the leader, waking the applier if the
    /// commit index moved.
    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut state = self.state.write().await;
        let commit_before = state.commit_index;
        let response = handle_append_entries(&mut state, &req, self.id);
        let commit_after = state.commit_index;
        drop(state);

        if response.success {
            *self.last_heartbeat.write().await = Instant::now();
        }
        if commit_after > commit_before {
            self.commit_tx.send_replace(commit_after);
        }

        response
    }

    /// Propose a command and wait for it to commit and apply.
    pub async fn propose_and_wait(
        &self,
        command: LogCommand,
    ) -> Result<CommandOutcome, Rejection> {
        let (tx, rx) = oneshot::channel();
        if self
            .message_tx
            .send(RaftMessage::Propose {
                command,
                response_tx: tx,
            })
            .await
            .is_err()
        {
            return Err(Rejection::Unavailable);
        }
        rx.await.map_err(|_| Rejection::Unavailable)?
    }

    /// Whether a majority of peers acknowledged replication recently enough
    /// that this leader's lease is still live.
    async fn quorum_is_recent(&self) -> bool {
        let peers = self.peers.read().await;
        if peers.is_empty() {
            return true;
        }
        let majority = (peers.len() + 1) / 2 + 1;
        let window = Duration::from_millis(self.config.election_timeout_min_ms);
        let acks = self.peer_acks.read().await;
        let recent = peers
            .iter()
            .filter(|p| acks.get(p).is_some_and(|t| t.elapsed() < window))
            .count();
        recent + 1 >= majority
    }

    async fn local_read(&self, query: &QueryOp) -> QueryOutcome {
        let applied = self.state.read().await.last_applied;
        let value = match query {
            QueryOp::Primitive { resource, op } => {
                self.machine.read().await.query(*resource, op)
            }
            QueryOp::PrimitiveNames { ty } => {
                Ok(OpResult::Names(self.machine.read().await.names_of(*ty)))
            }
            QueryOp::Leader => {
                let state = self.state.read().await;
                let leader = if state.role == RaftRole::Leader {
                    Some(self.id)
                } else {
                    state.leader_id
                };
                Ok(OpResult::Node(leader))
            }
        };
        QueryOutcome { applied, value }
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.role == RaftRole::Leader
    }

    /// This node's view of the current leader, itself included.
    pub async fn get_leader_id(&self) -> Option<u64> {
        let state = self.state.read().await;
        if state.role == RaftRole::Leader {
            Some(self.id)
        } else {
            state.leader_id
        }
    }

    /// Current cluster members (peers plus self), sorted.
    pub async fn members(&self) -> Vec<u64> {
        let mut members: Vec<u64> = self.peers.read().await.iter().copied().collect();
        members.push(self.id);
        members.sort_unstable();
        members
    }

    async fn cluster_view(&self, index: u64) -> ClusterView {
        ClusterView {
            leader: self.id,
            members: self.members().await,
            index,
        }
    }
}

/// Advance the leader's commit index to the highest entry replicated on a
/// majority, counting only entries from the current term.
fn advance_commit_index(state: &mut RaftState) -> Option<u64> {
    let mut match_indices: Vec<u64> = state.match_index.values().copied().collect();
    // Our own log counts toward the majority.
    match_indices.push(state.last_log_index());
    match_indices.sort_unstable();

    let majority_index = match_indices.len() / 2;
    let new_commit_index = match_indices[majority_index];

    if new_commit_index > state.commit_index {
        if let Some(entry) = state.get_entry(new_commit_index) {
            if entry.term == state.current_term() {
                state.commit_index = new_commit_index;
                return Some(new_commit_index);
            }
        }
    }
    None
}

#[async_trait]
impl crate::protocol::RequestHandler for RaftNode {
    async fn on_vote(&self, request: VoteRequest) -> VoteResponse {
        self.handle_vote_request(request).await
    }

    async fn on_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        self.handle_append_entries(request).await
    }

    async fn on_command(&self, request: CommandRequest) -> CommandResponse {
        CommandResponse {
            result: self.propose_and_wait(request.command).await,
        }
    }

    async fn on_query(&self, request: QueryRequest) -> QueryResponse {
        let result = match request.level {
            ConsistencyLevel::Linearizable => {
                let (role, leader_hint) = {
                    let state = self.state.read().await;
                    (state.role, state.leader_id)
                };
                if role != RaftRole::Leader {
                    Err(Rejection::NotLeader { leader_hint })
                } else if !self.quorum_is_recent().await {
                    Err(Rejection::NoQuorum)
                } else {
                    // Fold in anything committed but not yet applied so the
                    // read observes every acknowledged write.
                    self.apply_committed().await;
                    Ok(self.local_read(&request.query).await)
                }
            }
            ConsistencyLevel::Sequential => {
                let applied = self.state.read().await.last_applied;
                if applied < request.min_index {
                    Err(Rejection::LaggingReplica { applied })
                } else {
                    Ok(self.local_read(&request.query).await)
                }
            }
            ConsistencyLevel::BestEffort => Ok(self.local_read(&request.query).await),
        };
        QueryResponse { result }
    }

    async fn on_join(&self, request: JoinRequest) -> JoinResponse {
        let (role, leader_hint) = {
            let state = self.state.read().await;
            (state.role, state.leader_id)
        };
        if role != RaftRole::Leader {
            return JoinResponse {
                result: Err(Rejection::NotLeader { leader_hint }),
            };
        }

        if request.node_id == self.id || self.peers.read().await.contains(&request.node_id) {
            return JoinResponse {
                result: Ok(self.cluster_view(0).await),
            };
        }

        let result = match self
            .propose_and_wait(LogCommand::AddMember(request.node_id))
            .await
        {
            Ok(outcome) => Ok(self.cluster_view(outcome.index).await),
            Err(rejection) => Err(rejection),
        };
        JoinResponse { result }
    }

    async fn on_leave(&self, request: LeaveRequest) -> LeaveResponse {
        let (role, leader_hint) = {
            let state = self.state.read().await;
            (state.role, state.leader_id)
        };
        if role != RaftRole::Leader {
            return LeaveResponse {
                result: Err(Rejection::NotLeader { leader_hint }),
            };
        }

        if request.node_id != self.id && !self.peers.read().await.contains(&request.node_id) {
            return LeaveResponse {
                result: Ok(self.cluster_view(0).await),
            };
        }

        let result = match self
            .propose_and_wait(LogCommand::RemoveMember(request.node_id))
            .await
        {
            Ok(outcome) => Ok(self.cluster_view(outcome.index).await),
            Err(rejection) => Err(rejection),
        };
        LeaveResponse { result }
    }
}
