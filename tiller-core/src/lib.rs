//! Tiller Core - strongly-typed identifiers for the tiller crates.
//!
//! Every protocol-level quantity gets its own newtype so that a term can
//! never be passed where a log index is expected. All identifiers are
//! 64-bit with a distinguished zero sentinel.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod types;

pub use types::{ClientId, LogIndex, NodeId, ReadSeq, TermId};
