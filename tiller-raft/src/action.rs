//! Output actions from the transition engine.

use tiller_core::{ClientId, NodeId};

use crate::client::ClientResponse;
use crate::log::LogEntry;
use crate::message::Message;
use crate::transition::TimerKind;

/// An effect the host must carry out on behalf of the node.
///
/// The transition engine never performs I/O; it describes it. The host is
/// expected to execute actions in order, and to make `AppendLog` durable
/// before any later `Send`, `Broadcast` or `Respond` in the same batch
/// becomes externally visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a message to a single peer.
    Send {
        /// Destination node.
        to: NodeId,
        /// The message to deliver.
        message: Message,
    },
    /// Send one message body to a set of peers. The host re-addresses the
    /// body per recipient via [`Message::addressed_to`].
    Broadcast {
        /// Destination nodes, in ascending ID order.
        to: Vec<NodeId>,
        /// The message to deliver to each.
        message: Message,
    },
    /// Respond to a client.
    Respond {
        /// The client awaiting the response.
        client: ClientId,
        /// The response.
        response: ClientResponse,
    },
    /// Re-arm a timer. For election timers the host samples a fresh
    /// randomized duration from the configured range on every reset.
    ResetTimer(TimerKind),
    /// Append entries to the durable log. The entries are contiguous; if
    /// the first entry's index is already occupied, the existing suffix
    /// from that index on conflicts with the leader's log and must be
    /// truncated before appending.
    AppendLog(Vec<LogEntry>),
}
