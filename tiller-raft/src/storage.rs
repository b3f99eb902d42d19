//! Durable log storage capability.
//!
//! The transition engine reads the log through this trait and mutates it
//! only via [`crate::Action::AppendLog`] actions executed by the host.
//! Implementations must guarantee durability: once a method returns
//! successfully (after `sync`), the data survives a crash.

use thiserror::Error;
use tiller_core::LogIndex;

use crate::log::LogEntry;
use crate::state::PersistentState;

/// Storage result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage error types.
///
/// Storage failures are fatal to the event being processed; the host
/// decides between retrying the event and crashing the node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An I/O error during a storage operation.
    #[error("storage I/O error during {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error description.
        message: String,
    },
    /// Data corruption detected.
    #[error("storage corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },
}

/// Durable storage for the replicated log and the term/vote record.
pub trait LogStore {
    /// Loads the persisted term/vote record, or `None` on a fresh start.
    ///
    /// # Errors
    /// Returns an error if the record cannot be read.
    fn load_state(&self) -> StoreResult<Option<PersistentState>>;

    /// Persists the term/vote record. Must be durable before any action
    /// that depends on it (a granted vote, an append response) is
    /// externalized.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    fn save_state(&mut self, state: &PersistentState) -> StoreResult<()>;

    /// Appends entries to the tail of the log. The entries' indexes must
    /// be contiguous and follow the current last index.
    ///
    /// # Errors
    /// Returns `Corruption` on a non-sequential append.
    fn append(&mut self, entries: &[LogEntry]) -> StoreResult<()>;

    /// Reads the entry at `index`, or `None` if absent.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be read.
    fn entry(&self, index: LogIndex) -> StoreResult<Option<LogEntry>>;

    /// Reads all entries from `index` to the end of the log.
    ///
    /// # Errors
    /// Returns an error if the entries cannot be read.
    fn entries_from(&self, index: LogIndex) -> StoreResult<Vec<LogEntry>>;

    /// Reads the last entry, or `None` if the log is empty.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be read.
    fn last_entry(&self) -> StoreResult<Option<LogEntry>>;

    /// Truncates the suffix `[index, ..]` from the log.
    ///
    /// # Errors
    /// Returns an error if truncation fails.
    fn truncate_from(&mut self, index: LogIndex) -> StoreResult<()>;

    /// Syncs all written data to stable storage.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StoreResult<()>;
}

/// In-memory storage implementation.
///
/// Provides no real durability; intended for tests and simulation, where
/// "durable" means "survives until the process exits".
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// The persisted term/vote record.
    state: Option<PersistentState>,
    /// Log entries, 0-indexed internally while `LogIndex` starts at 1.
    entries: Vec<LogEntry>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self { state: None, entries: Vec::new() }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn offset(&self, index: LogIndex) -> Option<usize> {
        let raw = index.get();
        if raw == 0 || raw > self.entries.len() as u64 {
            return None;
        }
        // Bounded by entries.len(), which fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let offset = (raw - 1) as usize;
        Some(offset)
    }
}

impl LogStore for MemoryStore {
    fn load_state(&self) -> StoreResult<Option<PersistentState>> {
        Ok(self.state.clone())
    }

    fn save_state(&mut self, state: &PersistentState) -> StoreResult<()> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn append(&mut self, entries: &[LogEntry]) -> StoreResult<()> {
        for entry in entries {
            let expected = self.entries.len() as u64 + 1;
            if entry.index.get() != expected {
                return Err(StoreError::Corruption {
                    message: format!(
                        "non-sequential append: expected {expected}, got {}",
                        entry.index.get()
                    ),
                });
            }
            self.entries.push(entry.clone());
        }
        Ok(())
    }

    fn entry(&self, index: LogIndex) -> StoreResult<Option<LogEntry>> {
        Ok(self.offset(index).map(|o| self.entries[o].clone()))
    }

    fn entries_from(&self, index: LogIndex) -> StoreResult<Vec<LogEntry>> {
        match self.offset(index) {
            Some(o) => Ok(self.entries[o..].to_vec()),
            None => Ok(Vec::new()),
        }
    }

    fn last_entry(&self) -> StoreResult<Option<LogEntry>> {
        Ok(self.entries.last().cloned())
    }

    fn truncate_from(&mut self, index: LogIndex) -> StoreResult<()> {
        if let Some(o) = self.offset(index) {
            self.entries.truncate(o);
        }
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        // No-op for memory storage.
        Ok(())
    }
}
