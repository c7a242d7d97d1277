//! Raft consensus implementation.
//!
//! `state` holds the persistent and volatile per-node state, `rpc` the pure
//! request handlers, `node` the event loop that drives elections,
//! replication, and the application of committed entries.

pub mod node;
pub mod rpc;
pub mod state;
pub mod timer;

pub use node::{RaftMessage, RaftNode};
pub use state::{LogCommand, LogEntry, RaftRole, RaftState};
