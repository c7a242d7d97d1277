use std::time::Duration;

/// Configuration for a single consensus node.
///
/// Peers are addressed purely by node id; resolving an id to a network
/// endpoint is the transport's concern.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u64,
    pub peers: Vec<u64>,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            peers: Vec::new(),
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, node_id: u64) -> Self {
        self.peers.push(node_id);
        self
    }
}

/// Client-side dispatch configuration: the per-operation deadline and the
/// retry budget used when chasing the current leader.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for a single client-facing operation, including retries.
    pub operation_timeout: Duration,
    /// Maximum number of attempts before surfacing a terminal failure.
    pub max_attempts: u32,
    /// Base backoff between attempts; grows linearly with the attempt count.
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            max_attempts: 8,
            retry_backoff: Duration::from_millis(10),
        }
    }
}
