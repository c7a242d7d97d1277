//! Wire message types exchanged between cluster nodes.
//!
//! Every request/response pair here is transport-agnostic: the same structs
//! travel over the in-memory loopback registry in tests and over whatever
//! substrate a production transport provides. Application-level rejections
//! (`Rejection`) are carried inside successful responses so the dispatcher
//! can tell "the node answered no" apart from "the node never answered".

use serde::{Deserialize, Serialize};

use crate::error::PrimitiveError;
use crate::machine::{OpResult, PrimitiveOp};
use crate::primitives::PrimitiveType;
use crate::raft::state::LogEntry;

/// Caller-chosen staleness bound for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Leader round trip with a live quorum check. Strongest.
    Linearizable,
    /// Any replica whose applied index has reached the client's read floor.
    Sequential,
    /// Served immediately from local state, no ordering guarantee.
    BestEffort,
}

/// Protocol-level rejection of an otherwise well-formed request.
///
/// Distinct from a transport failure: the target node was reachable and
/// answered, but declined to serve the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The contacted node is not the leader; `leader_hint` is its best guess.
    NotLeader { leader_hint: Option<u64> },
    /// The replica has not applied up to the client's read floor.
    LaggingReplica { applied: u64 },
    /// The leader cannot currently confirm a majority.
    NoQuorum,
    /// The node is shutting down; the outcome of the request is unknown.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    pub match_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: crate::raft::state::LogCommand,
}

/// Result of a committed and applied command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Log index at which the command committed.
    pub index: u64,
    /// Typed result of applying the command to the state machine.
    pub value: std::result::Result<OpResult, PrimitiveError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: std::result::Result<CommandOutcome, Rejection>,
}

/// Read-only operations, routed by consistency level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOp {
    /// A read against a named primitive instance.
    Primitive { resource: u64, op: PrimitiveOp },
    /// Administrative enumeration of primitive names by type.
    PrimitiveNames { ty: PrimitiveType },
    /// The responding node's view of the current leader.
    Leader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: QueryOp,
    pub level: ConsistencyLevel,
    /// Client-tracked monotonic read floor, honored by `Sequential` queries.
    pub min_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// The responding node's applied index at the time of the read.
    pub applied: u64,
    pub value: std::result::Result<OpResult, PrimitiveError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub result: std::result::Result<QueryOutcome, Rejection>,
}

/// Snapshot of cluster membership returned by join/leave requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    pub leader: u64,
    pub members: Vec<u64>,
    /// Log index at which the membership change (if any) committed.
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub result: std::result::Result<ClusterView, Rejection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub node_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub result: std::result::Result<ClusterView, Rejection>,
}
