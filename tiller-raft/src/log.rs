//! Replicated log entries.

use bytes::Bytes;
use tiller_core::{ClientId, LogIndex, TermId};

/// The payload of a log entry, tagged by its issuer.
///
/// Leader-issued `Noop` entries and client-issued `Command` entries share
/// the log but surface differently after commit: a `Noop` is never
/// acknowledged to any client, it only exists so a fresh leader commits an
/// entry in its own term (section 5.4.2 in the Raft paper), which in turn
/// allows earlier-term entries to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    /// Leader-issued placeholder appended when a node assumes leadership.
    Noop,
    /// A client-issued command for the replicated state machine.
    Command {
        /// The client that submitted the command.
        client: ClientId,
        /// The opaque command data.
        data: Bytes,
    },
}

impl EntryPayload {
    /// Returns true if this is a leader-issued no-op.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }
}

/// A single entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The log index of this entry. Indexes are contiguous and start at 1.
    pub index: LogIndex,
    /// The term in which the entry was issued by a leader.
    pub term: TermId,
    /// The issuer-tagged payload.
    pub payload: EntryPayload,
}

impl LogEntry {
    /// Creates a new log entry.
    #[must_use]
    pub const fn new(index: LogIndex, term: TermId, payload: EntryPayload) -> Self {
        Self { index, term, payload }
    }

    /// Creates a leader-issued no-op entry.
    #[must_use]
    pub const fn noop(index: LogIndex, term: TermId) -> Self {
        Self::new(index, term, EntryPayload::Noop)
    }

    /// Creates a client-issued command entry.
    #[must_use]
    pub const fn command(index: LogIndex, term: TermId, client: ClientId, data: Bytes) -> Self {
        Self::new(index, term, EntryPayload::Command { client, data })
    }
}
