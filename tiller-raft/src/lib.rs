//! Tiller Raft - a pure, event-driven Raft consensus core.
//!
//! This crate implements the Raft replicated-log protocol as a deterministic
//! state transition function. A node is fed events (timer expirations, peer
//! RPCs, client requests) through [`handle_event`] and answers with a new
//! state plus a list of [`Action`]s: RPCs to send, log entries to persist,
//! client responses, and timer resets. The transition itself performs no
//! I/O; storage and the replicated state machine sit behind the [`LogStore`]
//! and [`StateMachine`] capability traits, and all timing is injected as
//! events by the host.
//!
//! [`RaftEngine`] wires the pieces together for hosts that want a ready-made
//! single-node driver: it owns a store and a machine, persists state before
//! any dependent action becomes visible, and runs the commit-and-apply
//! pipeline after every event.
//!
//! # Design principles
//!
//! - **Pure core**: `handle_event` is deterministic over its inputs, which
//!   makes every protocol decision unit-testable without threads or clocks.
//! - **Effects as data**: the transition returns actions instead of
//!   performing them, so the host controls durability and delivery order.
//! - **No unsafe code**: safety > performance.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod action;
mod client;
mod config;
mod engine;
mod log;
mod machine;
mod message;
mod state;
mod storage;
mod trace;
mod transition;

pub use action::Action;
pub use client::{ClientRequest, ClientResponse, RaftClient, RequestBody};
pub use config::RaftConfig;
pub use engine::{EngineError, RaftEngine};
pub use log::{EntryPayload, LogEntry};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, Message, RequestVoteRequest, RequestVoteResponse,
};
pub use machine::{MachineError, StateMachine};
pub use state::{
    CandidateState, FollowerState, LeaderState, NodeState, PendingRead, PersistentState,
};
pub use storage::{LogStore, MemoryStore, StoreError, StoreResult};
pub use trace::Trace;
pub use transition::{handle_event, Event, TimerKind, Transition, TransitionEnv};

/// Protocol limits and timing defaults.
pub mod limits {
    /// Maximum number of nodes in a cluster.
    pub const CLUSTER_SIZE_MAX: usize = 7;

    /// Default minimum election timeout, in milliseconds.
    ///
    /// Each `ResetTimer(Election)` action asks the host to re-arm the
    /// election timer with a fresh duration sampled uniformly from
    /// [min, max]; the spread prevents repeated split votes.
    pub const ELECTION_TIMEOUT_MS_MIN: u64 = 150;

    /// Default maximum election timeout, in milliseconds.
    pub const ELECTION_TIMEOUT_MS_MAX: u64 = 300;

    /// Default leader heartbeat interval, in milliseconds.
    ///
    /// Must be well below the minimum election timeout, or followers will
    /// call elections against a healthy leader.
    pub const HEARTBEAT_INTERVAL_MS: u64 = 50;
}
