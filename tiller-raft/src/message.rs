//! Raft RPC message types.

use tiller_core::{LogIndex, NodeId, ReadSeq, TermId};

use crate::log::LogEntry;

/// Raft message types for communication between nodes.
///
/// The wire encoding is host-defined; it must be deterministic and
/// lossless, but this crate only ever sees the decoded structs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request vote from candidate to other nodes.
    RequestVote(RequestVoteRequest),
    /// Response to vote request.
    RequestVoteResponse(RequestVoteResponse),
    /// Append entries from leader to followers (also used as heartbeat).
    AppendEntries(AppendEntriesRequest),
    /// Response to append entries.
    AppendEntriesResponse(AppendEntriesResponse),
}

impl Message {
    /// Returns the source node ID of this message.
    #[must_use]
    pub const fn from(&self) -> NodeId {
        match self {
            Self::RequestVote(r) => r.candidate_id,
            Self::RequestVoteResponse(r) => r.from,
            Self::AppendEntries(r) => r.leader_id,
            Self::AppendEntriesResponse(r) => r.from,
        }
    }

    /// Returns the destination node ID of this message.
    #[must_use]
    pub const fn to(&self) -> NodeId {
        match self {
            Self::RequestVote(r) => r.to,
            Self::RequestVoteResponse(r) => r.to,
            Self::AppendEntries(r) => r.to,
            Self::AppendEntriesResponse(r) => r.to,
        }
    }

    /// Returns the sender's term.
    #[must_use]
    pub const fn term(&self) -> TermId {
        match self {
            Self::RequestVote(r) => r.term,
            Self::RequestVoteResponse(r) => r.term,
            Self::AppendEntries(r) => r.term,
            Self::AppendEntriesResponse(r) => r.term,
        }
    }

    /// Re-addresses the message to another destination.
    ///
    /// Broadcast actions carry one message body for a set of recipients;
    /// the host stamps each copy with the actual destination.
    #[must_use]
    pub fn addressed_to(mut self, to: NodeId) -> Self {
        match &mut self {
            Self::RequestVote(r) => r.to = to,
            Self::RequestVoteResponse(r) => r.to = to,
            Self::AppendEntries(r) => r.to = to,
            Self::AppendEntriesResponse(r) => r.to = to,
        }
        self
    }
}

/// `RequestVote` RPC request.
///
/// Sent by candidates to gather votes during leader election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteRequest {
    /// Candidate's term.
    pub term: TermId,
    /// Candidate requesting the vote.
    pub candidate_id: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Index of the candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_log_term: TermId,
}

impl RequestVoteRequest {
    /// Creates a new `RequestVote` request.
    #[must_use]
    pub const fn new(
        term: TermId,
        candidate_id: NodeId,
        to: NodeId,
        last_log_index: LogIndex,
        last_log_term: TermId,
    ) -> Self {
        Self { term, candidate_id, to, last_log_index, last_log_term }
    }
}

/// `RequestVote` RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteResponse {
    /// Current term, for the candidate to update itself.
    pub term: TermId,
    /// Sender of this response.
    pub from: NodeId,
    /// Candidate that requested the vote.
    pub to: NodeId,
    /// True if the vote was granted.
    pub vote_granted: bool,
}

impl RequestVoteResponse {
    /// Creates a new `RequestVote` response.
    #[must_use]
    pub const fn new(term: TermId, from: NodeId, to: NodeId, vote_granted: bool) -> Self {
        Self { term, from, to, vote_granted }
    }
}

/// `AppendEntries` RPC request.
///
/// Sent by the leader to replicate log entries and as heartbeat. A
/// heartbeat may carry a read serial: the leader uses the quorum of acks
/// for that serial to confirm it is still the leader before serving a
/// linearizable read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    pub term: TermId,
    /// Leader sending this request.
    pub leader_id: NodeId,
    /// Target follower.
    pub to: NodeId,
    /// Index of the log entry immediately preceding the new ones.
    pub prev_log_index: LogIndex,
    /// Term of the `prev_log_index` entry.
    pub prev_log_term: TermId,
    /// Log entries to store (empty for heartbeat).
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: LogIndex,
    /// Read serial to acknowledge, if this heartbeat linearizes a read.
    pub read_request: Option<ReadSeq>,
}

impl AppendEntriesRequest {
    /// Creates a new `AppendEntries` request.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        term: TermId,
        leader_id: NodeId,
        to: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: TermId,
        entries: Vec<LogEntry>,
        leader_commit: LogIndex,
    ) -> Self {
        Self {
            term,
            leader_id,
            to,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
            read_request: None,
        }
    }

    /// Creates a heartbeat (`AppendEntries` with no entries).
    #[must_use]
    pub const fn heartbeat(
        term: TermId,
        leader_id: NodeId,
        to: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: TermId,
        leader_commit: LogIndex,
    ) -> Self {
        Self::new(term, leader_id, to, prev_log_index, prev_log_term, Vec::new(), leader_commit)
    }

    /// Attaches a read serial to this request.
    #[must_use]
    pub const fn with_read_request(mut self, read: ReadSeq) -> Self {
        self.read_request = Some(read);
        self
    }

    /// Returns true if this is a heartbeat (no entries).
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `AppendEntries` RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    /// Current term, for the leader to update itself.
    pub term: TermId,
    /// Sender of this response.
    pub from: NodeId,
    /// Leader that sent the request.
    pub to: NodeId,
    /// True if the follower contained an entry matching
    /// `prev_log_index`/`prev_log_term`.
    pub success: bool,
    /// On success, the index of the last entry known to match the leader.
    /// On failure, the follower's own last log index, which lets the
    /// leader backtrack past the divergence in one step.
    pub match_index: LogIndex,
    /// The read serial echoed back, if the accepted request carried one.
    pub read_request: Option<ReadSeq>,
}

impl AppendEntriesResponse {
    /// Creates a new `AppendEntries` response.
    #[must_use]
    pub const fn new(
        term: TermId,
        from: NodeId,
        to: NodeId,
        success: bool,
        match_index: LogIndex,
    ) -> Self {
        Self { term, from, to, success, match_index, read_request: None }
    }

    /// Echoes a read serial back to the leader.
    #[must_use]
    pub const fn with_read_request(mut self, read: ReadSeq) -> Self {
        self.read_request = Some(read);
        self
    }
}
