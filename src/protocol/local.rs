//! In-memory loopback transport for deterministic testing.
//!
//! Routes requests through a shared map from node identity to registered
//! handler. The registry is an explicit object created per test cluster and
//! discarded with it, never process-wide state. Links between node pairs can
//! be cut and healed to simulate network partitions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::messages::*;
use super::{ClientProtocol, ProtocolError, RequestHandler, ServerProtocol};

#[derive(Default)]
pub struct LocalProtocolRegistry {
    handlers: RwLock<HashMap<u64, Arc<dyn RequestHandler>>>,
    cut_links: RwLock<HashSet<(u64, u64)>>,
}

impl LocalProtocolRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a client protocol bound to the given origin node identity.
    pub fn client(self: &Arc<Self>, origin: u64) -> LocalClient {
        LocalClient {
            origin,
            registry: Arc::clone(self),
        }
    }

    /// Cut every link between the two groups, in both directions.
    pub fn partition(&self, group_a: &[u64], group_b: &[u64]) {
        let mut cut = self.cut_links.write().expect("cut_links lock poisoned");
        for &a in group_a {
            for &b in group_b {
                cut.insert(link(a, b));
            }
        }
    }

    /// Restore every link between the two groups.
    pub fn heal(&self, group_a: &[u64], group_b: &[u64]) {
        let mut cut = self.cut_links.write().expect("cut_links lock poisoned");
        for &a in group_a {
            for &b in group_b {
                cut.remove(&link(a, b));
            }
        }
    }

    /// Cut all links between the node and every other registered node.
    pub fn isolate(&self, node_id: u64) {
        let others = self.other_nodes(node_id);
        self.partition(&[node_id], &others);
    }

    /// Restore all links between the node and every other registered node.
    pub fn heal_node(&self, node_id: u64) {
        let others = self.other_nodes(node_id);
        self.heal(&[node_id], &others);
    }

    fn other_nodes(&self, node_id: u64) -> Vec<u64> {
        self.handlers
            .read()
            .expect("handlers lock poisoned")
            .keys()
            .copied()
            .filter(|&id| id != node_id)
            .collect()
    }

    fn route(&self, from: u64, to: u64) -> Result<Arc<dyn RequestHandler>, ProtocolError> {
        if self
            .cut_links
            .read()
            .expect("cut_links lock poisoned")
            .contains(&link(from, to))
        {
            return Err(ProtocolError::Unreachable(to));
        }
        self.handlers
            .read()
            .expect("handlers lock poisoned")
            .get(&to)
            .cloned()
            .ok_or(ProtocolError::Unreachable(to))
    }
}

impl ServerProtocol for LocalProtocolRegistry {
    fn register(&self, node_id: u64, handler: Arc<dyn RequestHandler>) {
        self.handlers
            .write()
            .expect("handlers lock poisoned")
            .insert(node_id, handler);
    }

    fn unregister(&self, node_id: u64) {
        self.handlers
            .write()
            .expect("handlers lock poisoned")
            .remove(&node_id);
    }
}

fn link(a: u64, b: u64) -> (u64, u64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Client protocol view of the registry for a single origin node.
#[derive(Clone)]
pub struct LocalClient {
    origin: u64,
    registry: Arc<LocalProtocolRegistry>,
}

#[async_trait]
impl ClientProtocol for LocalClient {
    async fn vote(
        &self,
        target: u64,
        request: VoteRequest,
    ) -> Result<VoteResponse, ProtocolError> {
        let handler = self.registry.route(self.origin, target)?;
        Ok(handler.on_vote(request).await)
    }

    async fn append_entries(
        &self,
        target: u64,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, ProtocolError> {
        let handler = self.registry.route(self.origin, target)?;
        Ok(handler.on_append_entries(request).await)
    }

    async fn command(
        &self,
        target: u64,
        request: CommandRequest,
    ) -> Result<CommandResponse, ProtocolError> {
        let handler = self.registry.route(self.origin, target)?;
        Ok(handler.on_command(request).await)
    }

    async fn query(
        &self,
        target: u64,
        request: QueryRequest,
    ) -> Result<QueryResponse, ProtocolError> {
        let handler = self.registry.route(self.origin, target)?;
        Ok(handler.on_query(request).await)
    }

    async fn join(
        &self,
        target: u64,
        request: JoinRequest,
    ) -> Result<JoinResponse, ProtocolError> {
        let handler = self.registry.route(self.origin, target)?;
        Ok(handler.on_join(request).await)
    }

    async fn leave(
        &self,
        target: u64,
        request: LeaveRequest,
    ) -> Result<LeaveResponse, ProtocolError> {
        let handler = self.registry.route(self.origin, target)?;
        Ok(handler.on_leave(request).await)
    }
}
