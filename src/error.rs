use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::PrimitiveType;
use crate::protocol::ProtocolError;

/// Application-level primitive failures.
///
/// These are typed outcomes of an operation against a replicated primitive.
/// They are never transient, so the dispatcher surfaces them verbatim and
/// never retries them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveError {
    #[error("unknown resource: {0}")]
    UnknownResource(u64),

    #[error("primitive {name:?} already exists as {existing}, requested {requested}")]
    TypeConflict {
        name: String,
        existing: PrimitiveType,
        requested: PrimitiveType,
    },

    #[error("lock is not held by the releasing session")]
    NotLockHolder,

    #[error("operation not valid for this primitive: {0}")]
    InvalidOperation(String),
}

#[derive(Error, Debug, Clone)]
pub enum QuorumError {
    #[error("not the leader, current leader is node {0:?}")]
    NotLeader(Option<u64>),

    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),

    #[error("operation timed out")]
    Timeout,

    #[error("leader cannot reach a quorum")]
    NoQuorum,

    #[error(transparent)]
    Primitive(#[from] PrimitiveError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation interrupted, outcome unknown: {0}")]
    Interrupted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, QuorumError>;
