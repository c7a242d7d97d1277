//! Replicated coordination primitives over Raft consensus.
//!
//! A cluster of nodes replicates a log of commands and applies them to a
//! deterministic state machine hosting distributed primitives: counters,
//! maps, locks, leader electors, work queues, document trees, and a batched
//! unique-id generator. Clients reach the cluster through a
//! consistency-aware dispatcher that chases the leader for writes and routes
//! reads by the requested consistency level.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod machine;
pub mod node;
pub mod primitives;
pub mod protocol;
pub mod raft;
pub mod serializer;
pub mod storage;

pub use config::{ClientConfig, NodeConfig};
pub use dispatch::Dispatcher;
pub use error::{PrimitiveError, QuorumError, Result};
pub use node::CoordinationNode;
pub use primitives::{Ordering, PrimitiveCreator, PrimitiveType};
pub use protocol::messages::ConsistencyLevel;
pub use protocol::LocalProtocolRegistry;
pub use serializer::{BincodeSerializer, Serializer};
