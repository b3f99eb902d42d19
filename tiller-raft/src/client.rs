//! Client request and response envelopes.
//!
//! # Request flow
//!
//! 1. A client sends a [`ClientRequest`] to some node in the cluster.
//! 2. A follower answers `Redirect(Some(leader))` with its current leader;
//!    a candidate (mid-election) answers `Redirect(None)`.
//! 3. The leader replicates writes and answers `Write(index)` once the
//!    entry commits; reads are answered with the applied machine snapshot
//!    after a heartbeat quorum confirms leadership.
//! 4. [`RaftClient`] tracks redirects so the next request goes straight to
//!    the leader.

use bytes::Bytes;
use tiller_core::{ClientId, LogIndex, NodeId};

/// The body of a client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// A linearizable read of the replicated state machine.
    Read,
    /// A command to replicate and apply.
    Write(Bytes),
}

/// A client request to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// The client submitting the request.
    pub client: ClientId,
    /// What the client wants done.
    pub body: RequestBody,
}

impl ClientRequest {
    /// Creates a read request.
    #[must_use]
    pub const fn read(client: ClientId) -> Self {
        Self { client, body: RequestBody::Read }
    }

    /// Creates a write request.
    #[must_use]
    pub const fn write(client: ClientId, command: Bytes) -> Self {
        Self { client, body: RequestBody::Write(command) }
    }
}

/// A response to a client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    /// The applied state machine snapshot, served only after the leader
    /// confirmed its leadership with a heartbeat quorum.
    Read(Bytes),
    /// The log index at which the write committed.
    Write(LogIndex),
    /// This node is not the leader; retry against the given node, or any
    /// node if the leader is unknown.
    Redirect(Option<NodeId>),
}

impl ClientResponse {
    /// Returns true if the request should be retried elsewhere.
    #[must_use]
    pub const fn should_redirect(&self) -> bool {
        matches!(self, Self::Redirect(_))
    }
}

/// Client-side state for interacting with a Raft cluster.
///
/// Remembers the leader learned from redirects and picks the target node
/// for the next request.
#[derive(Debug)]
pub struct RaftClient {
    /// Our client ID.
    client: ClientId,
    /// Known cluster members.
    cluster: Vec<NodeId>,
    /// Last known leader.
    leader: Option<NodeId>,
}

impl RaftClient {
    /// Creates a new client.
    ///
    /// # Panics
    /// Panics if the cluster is empty.
    #[must_use]
    pub fn new(client: ClientId, cluster: Vec<NodeId>) -> Self {
        assert!(!cluster.is_empty(), "cluster cannot be empty");
        Self { client, cluster, leader: None }
    }

    /// Returns our client ID.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client
    }

    /// Returns the last known leader.
    #[must_use]
    pub const fn leader(&self) -> Option<NodeId> {
        self.leader
    }

    /// Returns the node the next request should go to: the known leader,
    /// or the first cluster member when no leader is known.
    #[must_use]
    pub fn target_node(&self) -> NodeId {
        self.leader.unwrap_or(self.cluster[0])
    }

    /// Builds a read request.
    #[must_use]
    pub const fn read(&self) -> ClientRequest {
        ClientRequest::read(self.client)
    }

    /// Builds a write request.
    #[must_use]
    pub const fn write(&self, command: Bytes) -> ClientRequest {
        ClientRequest::write(self.client, command)
    }

    /// Digests a response, updating the leader hint on redirects.
    pub fn handle_response(&mut self, response: &ClientResponse) {
        if let ClientResponse::Redirect(leader) = response {
            self.leader = *leader;
        }
    }
}
