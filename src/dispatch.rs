//! Consistency-aware client dispatch.
//!
//! The dispatcher is the single path between primitive handles and the
//! cluster. Writes chase the current leader using rejection hints, reads are
//! routed according to the requested consistency level, and every applied
//! index observed on the way back raises the session's read floor so
//! sequential reads never travel backwards in time.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::config::ClientConfig;
use crate::error::{QuorumError, Result};
use crate::machine::OpResult;
use crate::protocol::messages::{
    CommandOutcome, CommandRequest, ConsistencyLevel, QueryOp, QueryRequest, Rejection,
};
use crate::protocol::{ClientProtocol, ProtocolError};
use crate::raft::state::LogCommand;

pub struct Dispatcher {
    protocol: Arc<dyn ClientProtocol>,
    members: Vec<u64>,
    config: ClientConfig,
    /// Best known leader, 0 when unknown.
    leader_hint: AtomicU64,
    /// Rotates which member a leaderless attempt probes next.
    cursor: AtomicU64,
    /// Highest applied index this session has observed.
    read_floor: AtomicU64,
    /// Serializes write attempts so retries observe each other's hints.
    write_gate: Mutex<()>,
}

impl Dispatcher {
    pub fn new(protocol: Arc<dyn ClientProtocol>, members: Vec<u64>, config: ClientConfig) -> Self {
        Self {
            protocol,
            members,
            config,
            leader_hint: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
            read_floor: AtomicU64::new(0),
            write_gate: Mutex::new(()),
        }
    }

    /// The highest applied index observed by this session.
    pub fn read_floor(&self) -> u64 {
        self.read_floor.load(AtomicOrdering::Acquire)
    }

    fn observe_index(&self, index: u64) {
        self.read_floor.fetch_max(index, AtomicOrdering::AcqRel);
    }

    fn next_target(&self) -> u64 {
        let hint = self.leader_hint.load(AtomicOrdering::Acquire);
        if hint != 0 {
            return hint;
        }
        let i = self.cursor.fetch_add(1, AtomicOrdering::Relaxed) as usize;
        self.members[i % self.members.len()]
    }

    fn record_hint(&self, hint: Option<u64>) {
        self.leader_hint
            .store(hint.unwrap_or(0), AtomicOrdering::Release);
    }

    /// Submit a command for replication and wait for it to commit and apply.
    ///
    /// Retries leader changes and unreachable nodes within the operation
    /// deadline. A transport failure after the command may have reached a
    /// leader is surfaced as `Interrupted` rather than retried, since the
    /// command is not idempotent from the dispatcher's point of view.
    pub async fn command(&self, command: LogCommand) -> Result<CommandOutcome> {
        let _gate = self.write_gate.lock().await;
        timeout(self.config.operation_timeout, self.command_inner(command))
            .await
            .map_err(|_| QuorumError::Timeout)?
    }

    async fn command_inner(&self, command: LogCommand) -> Result<CommandOutcome> {
        let mut last_error = QuorumError::NotLeader(None);

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                sleep(self.config.retry_backoff * attempt).await;
            }

            let target = self.next_target();
            let request = CommandRequest {
                command: command.clone(),
            };

            match self.protocol.command(target, request).await {
                Ok(response) => match response.result {
                    Ok(outcome) => {
                        self.record_hint(Some(target));
                        self.observe_index(outcome.index);
                        return Ok(outcome);
                    }
                    Err(Rejection::NotLeader { leader_hint }) => {
                        tracing::debug!(target, ?leader_hint, "Redirected to new leader");
                        self.record_hint(leader_hint);
                        last_error = QuorumError::NotLeader(leader_hint);
                    }
                    Err(Rejection::NoQuorum) => {
                        // The target may be a stale leader on the wrong side
                        // of a partition; probe the other nodes.
                        self.record_hint(None);
                        last_error = QuorumError::NoQuorum;
                    }
                    Err(rejection) => {
                        tracing::debug!(target, ?rejection, "Command rejected");
                        self.record_hint(None);
                        last_error = QuorumError::NotLeader(None);
                    }
                },
                Err(ProtocolError::Unreachable(node)) => {
                    tracing::warn!(node, "Command target unreachable");
                    self.record_hint(None);
                    last_error = QuorumError::Transport(ProtocolError::Unreachable(node));
                }
                Err(ProtocolError::Timeout(node)) => {
                    // The request may have been appended before the timeout;
                    // retrying could replicate the command twice.
                    self.record_hint(None);
                    return Err(QuorumError::Interrupted(format!(
                        "no response from node {node}"
                    )));
                }
            }
        }

        Err(last_error)
    }

    /// Read from the cluster at the requested consistency level.
    pub async fn query(&self, query: QueryOp, level: ConsistencyLevel) -> Result<OpResult> {
        timeout(self.config.operation_timeout, self.query_inner(query, level))
            .await
            .map_err(|_| QuorumError::Timeout)?
    }

    async fn query_inner(&self, query: QueryOp, level: ConsistencyLevel) -> Result<OpResult> {
        let min_index = self.read_floor();
        let mut last_error = QuorumError::NotLeader(None);

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                sleep(self.config.retry_backoff * attempt).await;
            }

            let target = match level {
                // Linearizable reads must go through the leader.
                ConsistencyLevel::Linearizable => self.next_target(),
                // Sequential and best-effort reads may hit any replica.
                _ => {
                    let i = self.cursor.fetch_add(1, AtomicOrdering::Relaxed) as usize;
                    self.members[i % self.members.len()]
                }
            };

            let request = QueryRequest {
                query: query.clone(),
                level,
                min_index,
            };

            match self.protocol.query(target, request).await {
                Ok(response) => match response.result {
                    Ok(outcome) => {
                        self.observe_index(outcome.applied);
                        return outcome.value.map_err(QuorumError::from);
                    }
                    Err(Rejection::NotLeader { leader_hint }) => {
                        self.record_hint(leader_hint);
                        last_error = QuorumError::NotLeader(leader_hint);
                    }
                    Err(Rejection::LaggingReplica { applied }) => {
                        tracing::debug!(target, applied, min_index, "Replica behind read floor");
                        last_error = QuorumError::NotLeader(None);
                    }
                    Err(Rejection::NoQuorum) => {
                        self.record_hint(None);
                        last_error = QuorumError::NoQuorum;
                    }
                    Err(Rejection::Unavailable) => {
                        last_error = QuorumError::NotLeader(None);
                    }
                },
                Err(e) => {
                    tracing::warn!(target, error = %e, "Query transport failure");
                    if level == ConsistencyLevel::Linearizable {
                        self.record_hint(None);
                    }
                    last_error = QuorumError::Transport(e);
                }
            }
        }

        Err(last_error)
    }

    /// Best-effort view of who currently leads the cluster.
    pub async fn leader(&self) -> Result<Option<u64>> {
        match self
            .query(QueryOp::Leader, ConsistencyLevel::BestEffort)
            .await?
        {
            OpResult::Node(leader) => Ok(leader),
            other => Err(QuorumError::Internal(format!(
                "unexpected leader query result: {other:?}"
            ))),
        }
    }
}
