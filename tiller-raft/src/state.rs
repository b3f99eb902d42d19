//! Node state: the durable term/vote record and the per-role volatile
//! states.
//!
//! A node is always in exactly one of three roles. The roles share the
//! commit/apply bookkeeping but diverge sharply in event handling, so they
//! are modeled as a closed tagged variant with exhaustive dispatch in
//! [`crate::transition`], not as trait objects.

use std::collections::{HashMap, HashSet};

use bytes::{Buf, BufMut, BytesMut};
use tiller_core::{ClientId, LogIndex, NodeId, ReadSeq, TermId};

/// Durable Raft state that must survive crashes.
///
/// This record must be persisted to stable storage before any action that
/// depends on it (a granted vote, an append response) becomes externally
/// visible. The log itself is persisted separately through
/// [`crate::LogStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentState {
    /// Latest term this node has seen (starts at 0, increases monotonically).
    pub current_term: TermId,
    /// The candidate that received this node's vote in the current term.
    pub voted_for: Option<NodeId>,
}

impl PersistentState {
    /// Creates the initial persistent state.
    #[must_use]
    pub const fn new() -> Self {
        Self { current_term: TermId::new(0), voted_for: None }
    }

    /// Advances to a later term, clearing the vote.
    ///
    /// # Panics
    /// Panics (debug) if the term regresses.
    #[must_use]
    pub fn advanced_to(&self, term: TermId) -> Self {
        debug_assert!(term >= self.current_term, "term regression");
        Self { current_term: term, voted_for: None }
    }

    /// Encodes the state to bytes.
    ///
    /// Format: term (8 bytes LE) + vote-present (1 byte) + vote (8 bytes
    /// LE if present).
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.current_term.get());
        match self.voted_for {
            Some(node) => {
                buf.put_u8(1);
                buf.put_u64_le(node.get());
            }
            None => buf.put_u8(0),
        }
    }

    /// Decodes a state from bytes, or `None` if the buffer is invalid.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 9 {
            return None;
        }

        let current_term = TermId::new(buf.get_u64_le());
        let voted_for = match buf.get_u8() {
            0 => None,
            1 if buf.remaining() >= 8 => Some(NodeId::new(buf.get_u64_le())),
            _ => return None,
        };

        Some(Self { current_term, voted_for })
    }
}

impl Default for PersistentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Volatile state of a follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowerState {
    /// The current leader, if one has been heard from this term.
    pub leader: Option<NodeId>,
    /// Index of the highest log entry known to be committed.
    pub commit_index: LogIndex,
    /// Index of the highest log entry applied to the state machine.
    pub last_applied: LogIndex,
}

impl FollowerState {
    /// Creates a follower state.
    #[must_use]
    pub const fn new(leader: Option<NodeId>, commit_index: LogIndex, last_applied: LogIndex) -> Self {
        Self { leader, commit_index, last_applied }
    }
}

/// Volatile state of a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateState {
    /// Votes received so far, including our own.
    pub votes: HashSet<NodeId>,
    /// Index of the highest log entry known to be committed.
    pub commit_index: LogIndex,
    /// Index of the highest log entry applied to the state machine.
    pub last_applied: LogIndex,
}

impl CandidateState {
    /// Creates a candidate state with a self-vote already tallied.
    #[must_use]
    pub fn new(node_id: NodeId, commit_index: LogIndex, last_applied: LogIndex) -> Self {
        let mut votes = HashSet::new();
        votes.insert(node_id);
        Self { votes, commit_index, last_applied }
    }
}

/// A pending linearizable read on the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRead {
    /// The client awaiting the snapshot.
    pub client: ClientId,
    /// Nodes that acknowledged the heartbeat carrying this read's serial,
    /// including the leader itself.
    pub acks: HashSet<NodeId>,
}

/// Volatile state of a leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderState {
    /// For each peer, the index of the next log entry to send.
    pub next_index: HashMap<NodeId, LogIndex>,
    /// For each peer, the index of the highest log entry known to be
    /// replicated there.
    pub match_index: HashMap<NodeId, LogIndex>,
    /// Index of the highest log entry known to be committed.
    pub commit_index: LogIndex,
    /// Index of the highest log entry applied to the state machine.
    pub last_applied: LogIndex,
    /// Index of the leader's own last log entry.
    pub last_index: LogIndex,
    /// Term of the leader's own last log entry.
    pub last_term: TermId,
    /// Clients waiting for a write to commit, keyed by the entry index.
    pub pending_writes: HashMap<LogIndex, ClientId>,
    /// Clients waiting for a read quorum, keyed by read serial.
    pub pending_reads: HashMap<ReadSeq, PendingRead>,
    /// The serial handed to the most recent read; valid for this term only.
    pub read_seq: ReadSeq,
}

impl LeaderState {
    /// Creates a leader state with replication indexes initialized from
    /// the leader's last log entry.
    #[must_use]
    pub fn new(
        peers: &[NodeId],
        last_index: LogIndex,
        last_term: TermId,
        commit_index: LogIndex,
        last_applied: LogIndex,
    ) -> Self {
        let next = last_index.next();
        let next_index = peers.iter().map(|&p| (p, next)).collect();
        let match_index = peers.iter().map(|&p| (p, LogIndex::new(0))).collect();
        Self {
            next_index,
            match_index,
            commit_index,
            last_applied,
            last_index,
            last_term,
            pending_writes: HashMap::new(),
            pending_reads: HashMap::new(),
            read_seq: ReadSeq::new(0),
        }
    }
}

/// A Raft node's volatile role state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Passive: replicates from a leader, votes when asked.
    Follower(FollowerState),
    /// Transitional: soliciting votes to become leader.
    Candidate(CandidateState),
    /// Active: accepts client requests, replicates the log.
    Leader(LeaderState),
}

impl NodeState {
    /// Creates the initial state: a leaderless follower with nothing
    /// committed or applied.
    #[must_use]
    pub const fn initial() -> Self {
        Self::Follower(FollowerState::new(None, LogIndex::new(0), LogIndex::new(0)))
    }

    /// Returns the commit index.
    #[must_use]
    pub const fn commit_index(&self) -> LogIndex {
        match self {
            Self::Follower(s) => s.commit_index,
            Self::Candidate(s) => s.commit_index,
            Self::Leader(s) => s.commit_index,
        }
    }

    /// Returns the applied index.
    #[must_use]
    pub const fn last_applied(&self) -> LogIndex {
        match self {
            Self::Follower(s) => s.last_applied,
            Self::Candidate(s) => s.last_applied,
            Self::Leader(s) => s.last_applied,
        }
    }

    /// Advances the applied index after the host applied committed entries.
    ///
    /// # Panics
    /// Panics (debug) if the applied index regresses or passes the commit
    /// index.
    pub fn set_last_applied(&mut self, applied: LogIndex) {
        debug_assert!(applied >= self.last_applied(), "applied index regression");
        debug_assert!(applied <= self.commit_index(), "applied past commit index");
        match self {
            Self::Follower(s) => s.last_applied = applied,
            Self::Candidate(s) => s.last_applied = applied,
            Self::Leader(s) => s.last_applied = applied,
        }
    }

    /// Returns the leader this node currently recognizes, if any.
    #[must_use]
    pub fn leader(&self) -> Option<NodeId> {
        match self {
            Self::Follower(s) => s.leader,
            Self::Candidate(_) => None,
            Self::Leader(_) => None,
        }
    }

    /// Returns true if this node is the leader.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }

    /// Returns the role name, for traces and status reporting.
    #[must_use]
    pub const fn role_name(&self) -> &'static str {
        match self {
            Self::Follower(_) => "follower",
            Self::Candidate(_) => "candidate",
            Self::Leader(_) => "leader",
        }
    }
}
