//! Per-node Raft configuration.

use std::time::Duration;

use rand::Rng;
use tiller_core::NodeId;

use crate::limits::{
    CLUSTER_SIZE_MAX, ELECTION_TIMEOUT_MS_MAX, ELECTION_TIMEOUT_MS_MIN, HEARTBEAT_INTERVAL_MS,
};

/// Static configuration for a Raft node.
///
/// The peer set is fixed at construction; membership changes are out of
/// scope for this crate.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's ID.
    pub node_id: NodeId,

    /// IDs of all nodes in the cluster (including this one).
    pub cluster: Vec<NodeId>,

    /// Minimum election timeout, in milliseconds.
    pub election_timeout_min_ms: u64,

    /// Maximum election timeout, in milliseconds (inclusive).
    pub election_timeout_max_ms: u64,

    /// Heartbeat interval, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl RaftConfig {
    /// Creates a new Raft configuration with default timing.
    ///
    /// # Panics
    /// Panics if the cluster is empty or too large, or if this node is not
    /// in the cluster.
    #[must_use]
    pub fn new(node_id: NodeId, cluster: Vec<NodeId>) -> Self {
        assert!(!cluster.is_empty(), "cluster cannot be empty");
        assert!(
            cluster.len() <= CLUSTER_SIZE_MAX,
            "cluster size {} exceeds maximum {}",
            cluster.len(),
            CLUSTER_SIZE_MAX
        );
        assert!(cluster.contains(&node_id), "node_id must be in cluster");

        Self {
            node_id,
            cluster,
            election_timeout_min_ms: ELECTION_TIMEOUT_MS_MIN,
            election_timeout_max_ms: ELECTION_TIMEOUT_MS_MAX,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
        }
    }

    /// Returns the number of nodes in the cluster.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.cluster.len()
    }

    /// Returns the quorum size (strict majority).
    #[must_use]
    pub fn quorum_size(&self) -> usize {
        self.cluster.len() / 2 + 1
    }

    /// Returns the other nodes in the cluster (excluding this node), in
    /// ascending ID order for deterministic broadcasts.
    #[must_use]
    pub fn peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .cluster
            .iter()
            .copied()
            .filter(|&id| id != self.node_id)
            .collect();
        peers.sort_unstable();
        peers
    }

    /// Samples a fresh randomized election timeout from the configured
    /// range. Hosts call this on every `ResetTimer(Election)` action.
    pub fn election_timeout(&self, rng: &mut impl Rng) -> Duration {
        let ms = rng.gen_range(self.election_timeout_min_ms..=self.election_timeout_max_ms);
        Duration::from_millis(ms)
    }

    /// Returns the heartbeat interval as a duration.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Sets a custom election timeout range, in milliseconds.
    ///
    /// # Panics
    /// Panics if `min_ms > max_ms` or `min_ms` is zero.
    #[must_use]
    pub fn with_election_timeout(mut self, min_ms: u64, max_ms: u64) -> Self {
        assert!(min_ms <= max_ms, "min must be <= max");
        assert!(min_ms > 0, "election timeout cannot be zero");

        self.election_timeout_min_ms = min_ms;
        self.election_timeout_max_ms = max_ms;
        self
    }

    /// Sets a custom heartbeat interval, in milliseconds.
    ///
    /// # Panics
    /// Panics if `interval_ms` is zero.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval_ms: u64) -> Self {
        assert!(interval_ms > 0, "heartbeat interval cannot be zero");

        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.cluster.is_empty() {
            return Err("cluster cannot be empty");
        }
        if self.cluster.len() > CLUSTER_SIZE_MAX {
            return Err("cluster too large");
        }
        if !self.cluster.contains(&self.node_id) {
            return Err("node_id not in cluster");
        }
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err("election timeout min > max");
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err("heartbeat interval must be less than election timeout");
        }
        Ok(())
    }
}
