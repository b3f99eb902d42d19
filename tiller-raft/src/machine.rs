//! Replicated state machine capability.

use bytes::Bytes;
use thiserror::Error;
use tiller_core::LogIndex;

/// A state machine application error.
///
/// Application is deterministic, so a failure here reproduces on replay at
/// every replica; it indicates a bug in the host command set rather than a
/// transient condition. The driver halts application when it sees one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("apply failed at {index}: {message}")]
pub struct MachineError {
    /// The log index whose command failed to apply.
    pub index: LogIndex,
    /// Error description.
    pub message: String,
}

impl MachineError {
    /// Creates a new machine error.
    #[must_use]
    pub fn new(index: LogIndex, message: impl Into<String>) -> Self {
        Self { index, message: message.into() }
    }
}

/// The host's deterministic replicated state machine.
///
/// Committed commands are applied strictly in index order, exactly once
/// per process lifetime. Given the same command sequence, every replica
/// must reach the same state.
pub trait StateMachine {
    /// Applies a committed command.
    ///
    /// # Errors
    /// Returns an error if the command is invalid; see [`MachineError`].
    fn apply(&mut self, index: LogIndex, command: &Bytes) -> Result<(), MachineError>;

    /// Returns a snapshot of the current applied state, served verbatim as
    /// the body of linearizable read responses.
    fn snapshot(&self) -> Bytes;
}
