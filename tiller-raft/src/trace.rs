//! Structured trace stream.
//!
//! Every transition returns the protocol events it witnessed as values, so
//! hosts (and tests) can observe protocol behavior without parsing log
//! text. [`crate::RaftEngine`] forwards them through `tracing`.

use std::fmt;

use tiller_core::{ClientId, LogIndex, NodeId, ReadSeq, TermId};

/// A protocol event emitted by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    /// The node observed a higher term and stepped down to follower.
    TermAdvanced {
        /// The new term.
        term: TermId,
    },
    /// The node started campaigning for leadership.
    ElectionStarted {
        /// The election term.
        term: TermId,
    },
    /// The node granted its vote to a candidate.
    VoteGranted {
        /// The candidate voted for.
        candidate: NodeId,
        /// The term of the vote.
        term: TermId,
    },
    /// The node won its election.
    BecameLeader {
        /// The leadership term.
        term: TermId,
    },
    /// The node started following a leader.
    FollowingLeader {
        /// The leader.
        leader: NodeId,
        /// The term.
        term: TermId,
    },
    /// A stale message (from a past term) was dropped.
    StaleMessage {
        /// The sender.
        from: NodeId,
        /// The sender's term.
        term: TermId,
    },
    /// An append was rejected because the consistency check failed.
    AppendRejected {
        /// The leader whose entries were rejected.
        leader: NodeId,
        /// The base index that did not match.
        prev_log_index: LogIndex,
    },
    /// The commit index advanced.
    Committed {
        /// The new commit index.
        index: LogIndex,
    },
    /// A linearizable read was confirmed by a heartbeat quorum.
    ReadConfirmed {
        /// The read serial.
        read: ReadSeq,
        /// The waiting client.
        client: ClientId,
    },
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TermAdvanced { term } => write!(f, "advanced to {term}"),
            Self::ElectionStarted { term } => write!(f, "started election for {term}"),
            Self::VoteGranted { candidate, term } => {
                write!(f, "granted vote to {candidate} in {term}")
            }
            Self::BecameLeader { term } => write!(f, "became leader in {term}"),
            Self::FollowingLeader { leader, term } => {
                write!(f, "following {leader} in {term}")
            }
            Self::StaleMessage { from, term } => {
                write!(f, "dropped stale message from {from} at {term}")
            }
            Self::AppendRejected { leader, prev_log_index } => {
                write!(f, "rejected append from {leader} at {prev_log_index}")
            }
            Self::Committed { index } => write!(f, "committed up to {index}"),
            Self::ReadConfirmed { read, client } => {
                write!(f, "confirmed {read} for {client}")
            }
        }
    }
}
