//! Protocol transport abstraction.
//!
//! Defines the two role interfaces nodes use to talk to each other: a client
//! protocol that issues requests to a named node, and a server protocol that
//! registers a handler for incoming requests addressed to a node. The
//! consensus core only ever sees these traits; whether requests travel over
//! an in-memory map or a network socket is the implementation's business.

pub mod local;
pub mod messages;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use local::{LocalClient, LocalProtocolRegistry};
pub use messages::*;

/// Transport-level failures, distinct from application-level rejection.
///
/// The dispatcher treats these as retryable against another node; a
/// `Rejection` inside a response is not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("node {0} is unreachable")]
    Unreachable(u64),

    #[error("request to node {0} timed out")]
    Timeout(u64),
}

/// Client side of the protocol: issues requests to a target node and awaits
/// the response or a transport failure.
#[async_trait]
pub trait ClientProtocol: Send + Sync {
    async fn vote(&self, target: u64, request: VoteRequest)
        -> Result<VoteResponse, ProtocolError>;

    async fn append_entries(
        &self,
        target: u64,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, ProtocolError>;

    async fn command(
        &self,
        target: u64,
        request: CommandRequest,
    ) -> Result<CommandResponse, ProtocolError>;

    async fn query(
        &self,
        target: u64,
        request: QueryRequest,
    ) -> Result<QueryResponse, ProtocolError>;

    async fn join(&self, target: u64, request: JoinRequest)
        -> Result<JoinResponse, ProtocolError>;

    async fn leave(
        &self,
        target: u64,
        request: LeaveRequest,
    ) -> Result<LeaveResponse, ProtocolError>;
}

/// Handler for incoming requests addressed to one node.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_vote(&self, request: VoteRequest) -> VoteResponse;
    async fn on_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse;
    async fn on_command(&self, request: CommandRequest) -> CommandResponse;
    async fn on_query(&self, request: QueryRequest) -> QueryResponse;
    async fn on_join(&self, request: JoinRequest) -> JoinResponse;
    async fn on_leave(&self, request: LeaveRequest) -> LeaveResponse;
}

/// Server side of the protocol: binds a node identity to a request handler.
pub trait ServerProtocol: Send + Sync {
    fn register(&self, node_id: u64, handler: Arc<dyn RequestHandler>);
    fn unregister(&self, node_id: u64);
}
