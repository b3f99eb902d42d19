//! Single-node driver.
//!
//! [`RaftEngine`] owns one node's store and state machine and drives the
//! pure transition engine: it builds the [`TransitionEnv`] for each event,
//! persists the term/vote record and any appended entries before the
//! remaining actions become visible, runs the commit-and-apply pipeline,
//! and hands the outward actions (sends, broadcasts, client responses,
//! timer resets) back to the host transport.

use thiserror::Error;
use tiller_core::{NodeId, TermId};

use crate::action::Action;
use crate::config::RaftConfig;
use crate::log::{EntryPayload, LogEntry};
use crate::machine::{MachineError, StateMachine};
use crate::state::{NodeState, PersistentState};
use crate::storage::{LogStore, StoreError};
use crate::transition::{handle_event, Event, Transition, TransitionEnv};

/// A driver failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    /// The log store failed; the event may be retried once it recovers.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The state machine rejected a committed command. Deterministic: the
    /// same failure reproduces on replay at every replica.
    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// A Raft node bound to its durable store and state machine.
///
/// The host feeds events in via [`RaftEngine::step`] and carries out the
/// returned actions: delivering messages, answering clients, and
/// re-arming timers (sampling a fresh randomized duration for election
/// timers via [`RaftConfig::election_timeout`]).
pub struct RaftEngine<S, M> {
    config: RaftConfig,
    state: NodeState,
    persistent: PersistentState,
    store: S,
    machine: M,
}

impl<S: LogStore, M: StateMachine> RaftEngine<S, M> {
    /// Creates an engine over the given store and machine, resuming from
    /// the persisted term/vote record if one exists. The node always
    /// restarts as a leaderless follower; the host must arm its election
    /// timer.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the store
    /// cannot be read.
    pub fn new(config: RaftConfig, store: S, machine: M) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        let persistent = store.load_state()?.unwrap_or_default();
        Ok(Self { config, state: NodeState::initial(), persistent, store, machine })
    }

    /// Returns the node's configuration.
    pub const fn config(&self) -> &RaftConfig {
        &self.config
    }

    /// Returns the node's ID.
    pub const fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Returns the node's current volatile state.
    pub const fn state(&self) -> &NodeState {
        &self.state
    }

    /// Returns the node's current term.
    pub const fn term(&self) -> TermId {
        self.persistent.current_term
    }

    /// Returns true if this node currently leads its term.
    pub const fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Returns the state machine.
    pub const fn machine(&self) -> &M {
        &self.machine
    }

    /// Returns the log store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Releases the store and machine, e.g. to restart the node on them.
    pub fn into_parts(self) -> (S, M) {
        (self.store, self.machine)
    }

    /// Processes one event and returns the outward actions for the host:
    /// `Send`, `Broadcast`, `Respond` and `ResetTimer`. Log appends and
    /// the term/vote record have been made durable by the time this
    /// returns, and newly committed entries have been applied to the
    /// machine.
    ///
    /// # Errors
    /// Returns an error if storage fails or the machine rejects a
    /// committed command.
    pub fn step(&mut self, event: Event) -> Result<Vec<Action>, EngineError> {
        let transition = {
            let env = TransitionEnv::new(&self.config, &self.store, self.machine.snapshot())?;
            handle_event(self.state.clone(), self.persistent.clone(), &env, event)?
        };
        let Transition { state, persistent, actions, traces } = transition;

        self.state = state;

        // The term/vote record must hit stable storage before any vote or
        // append response built on it leaves this node.
        if persistent != self.persistent {
            self.store.save_state(&persistent)?;
            self.store.sync()?;
            self.persistent = persistent;
        }

        let mut outward = Vec::with_capacity(actions.len());
        let mut appended = false;
        for action in actions {
            match action {
                Action::AppendLog(entries) => {
                    self.splice(&entries)?;
                    appended = true;
                }
                other => outward.push(other),
            }
        }
        if appended {
            self.store.sync()?;
        }

        for trace in &traces {
            tracing::debug!(node = %self.config.node_id, role = self.state.role_name(), "{trace}");
        }

        self.apply_committed()?;
        Ok(outward)
    }

    /// Writes appended entries through to the store. A first entry whose
    /// index is already occupied marks a conflicting suffix, which is
    /// truncated before appending.
    fn splice(&mut self, entries: &[LogEntry]) -> Result<(), EngineError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        if self.store.entry(first.index)?.is_some() {
            self.store.truncate_from(first.index)?;
        }
        self.store.append(entries)?;
        Ok(())
    }

    /// Applies committed entries, in index order, until the machine has
    /// caught up with the commit index.
    fn apply_committed(&mut self) -> Result<(), EngineError> {
        while self.state.commit_index() > self.state.last_applied() {
            let index = self.state.last_applied().next();
            let entry = self.store.entry(index)?.ok_or_else(|| StoreError::Corruption {
                message: format!("committed entry missing at {index}"),
            })?;
            if let EntryPayload::Command { data, .. } = &entry.payload {
                self.machine.apply(entry.index, data)?;
            }
            self.state.set_last_applied(index);
        }
        Ok(())
    }
}
