//! Node lifecycle: wiring a consensus node to a transport and running it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, NodeConfig};
use crate::dispatch::Dispatcher;
use crate::primitives::PrimitiveCreator;
use crate::protocol::{ClientProtocol, ServerProtocol};
use crate::raft::RaftNode;
use crate::storage::LogStore;

/// A running cluster member: a consensus node registered with a transport
/// and driven by a background task.
pub struct CoordinationNode {
    pub id: u64,
    raft: Arc<RaftNode>,
    client: Arc<dyn ClientProtocol>,
    server: Arc<dyn ServerProtocol>,
    shutdown: CancellationToken,
    run_task: JoinHandle<()>,
}

impl CoordinationNode {
    /// Start a node with a fresh in-memory log.
    pub fn start(
        config: NodeConfig,
        client: Arc<dyn ClientProtocol>,
        server: Arc<dyn ServerProtocol>,
    ) -> Self {
        Self::start_with_store(
            config,
            client,
            server,
            Box::new(crate::storage::MemoryStore::new()),
        )
    }

    /// Start a node over an existing store, recovering persisted consensus
    /// state.
    pub fn start_with_store(
        config: NodeConfig,
        client: Arc<dyn ClientProtocol>,
        server: Arc<dyn ServerProtocol>,
        store: Box<dyn LogStore>,
    ) -> Self {
        let node_id = config.node_id;
        let (raft, message_rx) = RaftNode::with_store(config, Arc::clone(&client), store);
        let raft = Arc::new(raft);
        server.register(node_id, Arc::clone(&raft) as _);

        let shutdown = CancellationToken::new();
        let run_task = {
            let raft = Arc::clone(&raft);
            let token = shutdown.child_token();
            tokio::spawn(async move {
                raft.run(message_rx, token).await;
            })
        };

        tracing::info!(node_id, "Node started");

        Self {
            id: node_id,
            raft,
            client,
            server,
            shutdown,
            run_task,
        }
    }

    /// Direct access to the consensus node, mainly for inspection.
    pub fn raft(&self) -> &Arc<RaftNode> {
        &self.raft
    }

    /// A dispatcher routing through this node's own transport client,
    /// addressing the currently known cluster members.
    pub async fn dispatcher(&self, config: ClientConfig) -> Arc<Dispatcher> {
        let members = self.raft.members().await;
        Arc::new(Dispatcher::new(Arc::clone(&self.client), members, config))
    }

    /// A primitive creator backed by this node.
    pub async fn primitives(&self, config: ClientConfig) -> PrimitiveCreator {
        PrimitiveCreator::new(self.dispatcher(config).await)
    }

    /// Stop the node: deregister from the transport so peers see it as
    /// unreachable, then cancel the consensus loop.
    pub async fn shutdown(self) {
        self.server.unregister(self.id);
        self.shutdown.cancel();
        if let Err(e) = self.run_task.await {
            tracing::warn!(node_id = self.id, error = %e, "Consensus task ended abnormally");
        }
        tracing::info!(node_id = self.id, "Node stopped");
    }
}
