//! The pure transition engine.
//!
//! [`handle_event`] is the heart of the crate: a deterministic function
//! from `(state, persistent, env, event)` to a new state, a new persistent
//! record, a list of [`Action`]s and a list of [`Trace`]s. It performs no
//! I/O of its own. The log is read through the read-only view in
//! [`TransitionEnv`] and mutated only by emitting [`Action::AppendLog`];
//! timing enters as [`Event::Timeout`] and leaves as
//! [`Action::ResetTimer`].

use bytes::Bytes;
use tiller_core::{ClientId, LogIndex, NodeId, ReadSeq, TermId};

use crate::action::Action;
use crate::client::{ClientRequest, ClientResponse, RequestBody};
use crate::config::RaftConfig;
use crate::log::LogEntry;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Message, RequestVoteRequest, RequestVoteResponse,
};
use crate::state::{
    CandidateState, FollowerState, LeaderState, NodeState, PendingRead, PersistentState,
};
use crate::storage::{LogStore, StoreError, StoreResult};
use crate::trace::Trace;

/// The timers a node asks its host to maintain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires when no leader has been heard from for the (randomized)
    /// election timeout. Armed on followers and candidates.
    Election,
    /// Fires every heartbeat interval. Armed on leaders.
    Heartbeat,
}

/// An input to the transition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A timer maintained by the host expired.
    Timeout(TimerKind),
    /// A message arrived from a peer.
    Message(Message),
    /// A client submitted a request to this node.
    Client(ClientRequest),
}

/// The read-only context a transition runs in.
///
/// The host builds one per event: the node's static configuration, a
/// read-only view of the durable log with the last entry pre-fetched, and
/// the current applied state machine snapshot (served on linearizable
/// reads). Everything a transition observes comes through here, which is
/// what makes [`handle_event`] deterministic and testable.
pub struct TransitionEnv<'a> {
    /// The node's static configuration.
    pub config: &'a RaftConfig,
    /// Read-only view of the durable log.
    log: &'a dyn LogStore,
    /// Index of the last log entry (zero if the log is empty).
    pub last_index: LogIndex,
    /// Term of the last log entry (zero if the log is empty).
    pub last_term: TermId,
    /// Snapshot of the applied state machine.
    pub snapshot: Bytes,
}

impl<'a> TransitionEnv<'a> {
    /// Builds an environment over the given log, pre-fetching the last
    /// entry.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read.
    pub fn new(
        config: &'a RaftConfig,
        log: &'a dyn LogStore,
        snapshot: Bytes,
    ) -> StoreResult<Self> {
        let (last_index, last_term) = log
            .last_entry()?
            .map_or((LogIndex::new(0), TermId::new(0)), |e| (e.index, e.term));
        Ok(Self { config, log, last_index, last_term, snapshot })
    }

    /// Returns the term of the entry at `index`, or `None` if absent.
    fn term_at(&self, index: LogIndex) -> StoreResult<Option<TermId>> {
        if index == self.last_index {
            return Ok(Some(self.last_term));
        }
        Ok(self.log.entry(index)?.map(|e| e.term))
    }

    /// Returns all entries from `index` to the end of the log.
    fn entries_from(&self, index: LogIndex) -> StoreResult<Vec<LogEntry>> {
        self.log.entries_from(index)
    }

    /// Returns the index and term of the entry preceding `index`, with
    /// zero sentinels before the first entry.
    fn prev_of(&self, index: LogIndex) -> StoreResult<(LogIndex, TermId)> {
        if index.get() <= 1 {
            return Ok((LogIndex::new(0), TermId::new(0)));
        }
        let prev = LogIndex::new(index.get() - 1);
        let term = self.term_at(prev)?.ok_or_else(|| StoreError::Corruption {
            message: format!("missing log entry at {prev}"),
        })?;
        Ok((prev, term))
    }

    const fn node_id(&self) -> NodeId {
        self.config.node_id
    }
}

/// The result of a transition: the node's new state plus everything the
/// host must do on its behalf.
#[derive(Debug)]
pub struct Transition {
    /// The new volatile role state.
    pub state: NodeState,
    /// The new durable term/vote record. Must be persisted before any of
    /// the actions become externally visible.
    pub persistent: PersistentState,
    /// Effects to execute, in order.
    pub actions: Vec<Action>,
    /// Protocol events witnessed by this transition.
    pub traces: Vec<Trace>,
}

impl Transition {
    fn new(
        state: NodeState,
        persistent: PersistentState,
        actions: Vec<Action>,
        traces: Vec<Trace>,
    ) -> Self {
        Self { state, persistent, actions, traces }
    }

    fn unchanged(state: NodeState, persistent: PersistentState) -> Self {
        Self::new(state, persistent, Vec::new(), Vec::new())
    }
}

/// Processes one event against the node's current state.
///
/// # Errors
/// Surfaces log-store read failures; the event can be retried once the
/// store recovers.
pub fn handle_event(
    state: NodeState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    event: Event,
) -> StoreResult<Transition> {
    match event {
        Event::Timeout(kind) => handle_timeout(state, persistent, env, kind),
        Event::Message(message) => handle_message(state, persistent, env, message),
        Event::Client(request) => handle_client(state, persistent, env, request),
    }
}

// ---------------------------------------------------------------------------
// Timeouts

fn handle_timeout(
    state: NodeState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    kind: TimerKind,
) -> StoreResult<Transition> {
    match (state, kind) {
        // Followers and candidates call (or re-call) an election when the
        // leader has gone quiet.
        (NodeState::Follower(f), TimerKind::Election) => {
            start_election(f.commit_index, f.last_applied, persistent, env)
        }
        (NodeState::Candidate(c), TimerKind::Election) => {
            start_election(c.commit_index, c.last_applied, persistent, env)
        }

        // Leaders re-assert leadership every heartbeat interval.
        (NodeState::Leader(leader), TimerKind::Heartbeat) => {
            let hb = heartbeat(&leader, &persistent, env.node_id(), None);
            let actions = vec![hb, Action::ResetTimer(TimerKind::Heartbeat)];
            Ok(Transition::new(NodeState::Leader(leader), persistent, actions, Vec::new()))
        }

        // A timer left over from a previous role; the reset that armed the
        // current role's timer supersedes it.
        (state, _) => Ok(Transition::unchanged(state, persistent)),
    }
}

/// Starts an election: advance the term, vote for ourselves, solicit votes
/// from every peer. A single-node cluster wins on the spot.
fn start_election(
    commit_index: LogIndex,
    last_applied: LogIndex,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
) -> StoreResult<Transition> {
    let term = persistent.current_term.next();
    let persistent = PersistentState { current_term: term, voted_for: Some(env.node_id()) };
    let candidate = CandidateState::new(env.node_id(), commit_index, last_applied);
    let traces = vec![Trace::ElectionStarted { term }];

    if candidate.votes.len() >= env.config.quorum_size() {
        return become_leader(candidate, persistent, env, traces);
    }

    let solicit = Message::RequestVote(RequestVoteRequest::new(
        term,
        env.node_id(),
        env.node_id(),
        env.last_index,
        env.last_term,
    ));
    let actions = vec![
        Action::Broadcast { to: env.config.peers(), message: solicit },
        Action::ResetTimer(TimerKind::Election),
    ];
    Ok(Transition::new(NodeState::Candidate(candidate), persistent, actions, traces))
}

/// Turns a candidate with a vote quorum into a leader: append a no-op
/// entry at the new term and replicate it immediately. Committing the
/// no-op in our own term is what lets earlier-term entries commit.
fn become_leader(
    candidate: CandidateState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    mut traces: Vec<Trace>,
) -> StoreResult<Transition> {
    let term = persistent.current_term;
    let peers = env.config.peers();
    let noop = LogEntry::noop(env.last_index.next(), term);

    let mut leader = LeaderState::new(
        &peers,
        noop.index,
        term,
        candidate.commit_index,
        candidate.last_applied,
    );
    traces.push(Trace::BecameLeader { term });

    let replicate = Message::AppendEntries(AppendEntriesRequest::new(
        term,
        env.node_id(),
        env.node_id(),
        env.last_index,
        env.last_term,
        vec![noop.clone()],
        leader.commit_index,
    ));
    let mut actions = vec![
        Action::AppendLog(vec![noop]),
        Action::Broadcast { to: peers, message: replicate },
        Action::ResetTimer(TimerKind::Heartbeat),
    ];

    // A single-node cluster has its quorum already.
    maybe_commit(&mut leader, &persistent, env, &mut actions, &mut traces)?;

    Ok(Transition::new(NodeState::Leader(leader), persistent, actions, traces))
}

// ---------------------------------------------------------------------------
// Peer messages

fn handle_message(
    state: NodeState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    message: Message,
) -> StoreResult<Transition> {
    debug_assert_eq!(message.to(), env.node_id(), "message addressed to another node");

    // Universal rule: a higher term always wins. Step down to follower in
    // the new term (clearing the vote) and process the message there. This
    // fires even when the message itself is then rejected.
    if message.term() > persistent.current_term {
        let term = message.term();
        let mut actions = abort_pending(&state);
        let mut traces = vec![Trace::TermAdvanced { term }];

        let follower = FollowerState::new(None, state.commit_index(), state.last_applied());
        let next = persistent.advanced_to(term);
        let inner = handle_message(NodeState::Follower(follower), next, env, message)?;

        actions.extend(inner.actions);
        traces.extend(inner.traces);
        return Ok(Transition::new(inner.state, inner.persistent, actions, traces));
    }

    // Stale requests are rejected with the current term so the sender can
    // catch up; stale responses are simply dropped.
    if message.term() < persistent.current_term {
        return Ok(reject_stale(state, persistent, env, &message));
    }

    match state {
        NodeState::Follower(follower) => follower_message(follower, persistent, env, message),
        NodeState::Candidate(candidate) => candidate_message(candidate, persistent, env, message),
        NodeState::Leader(leader) => leader_message(leader, persistent, env, message),
    }
}

/// Answers a message from a past term.
fn reject_stale(
    state: NodeState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    message: &Message,
) -> Transition {
    let term = persistent.current_term;
    let traces = vec![Trace::StaleMessage { from: message.from(), term: message.term() }];
    let actions = match message {
        Message::RequestVote(req) => vec![Action::Send {
            to: req.candidate_id,
            message: Message::RequestVoteResponse(RequestVoteResponse::new(
                term,
                env.node_id(),
                req.candidate_id,
                false,
            )),
        }],
        Message::AppendEntries(req) => vec![Action::Send {
            to: req.leader_id,
            message: Message::AppendEntriesResponse(AppendEntriesResponse::new(
                term,
                env.node_id(),
                req.leader_id,
                false,
                env.last_index,
            )),
        }],
        Message::RequestVoteResponse(_) | Message::AppendEntriesResponse(_) => Vec::new(),
    };
    Transition::new(state, persistent, actions, traces)
}

fn follower_message(
    mut follower: FollowerState,
    mut persistent: PersistentState,
    env: &TransitionEnv<'_>,
    message: Message,
) -> StoreResult<Transition> {
    let mut actions = Vec::new();
    let mut traces = Vec::new();

    match message {
        Message::RequestVote(req) => {
            let can_vote = persistent.voted_for.is_none()
                || persistent.voted_for == Some(req.candidate_id);
            let up_to_date = req.last_log_term > env.last_term
                || (req.last_log_term == env.last_term && req.last_log_index >= env.last_index);

            let granted = can_vote && up_to_date;
            if granted {
                persistent.voted_for = Some(req.candidate_id);
                traces.push(Trace::VoteGranted {
                    candidate: req.candidate_id,
                    term: persistent.current_term,
                });
                actions.push(Action::ResetTimer(TimerKind::Election));
            }
            actions.push(Action::Send {
                to: req.candidate_id,
                message: Message::RequestVoteResponse(RequestVoteResponse::new(
                    persistent.current_term,
                    env.node_id(),
                    req.candidate_id,
                    granted,
                )),
            });
        }

        Message::AppendEntries(req) => {
            // The sender is the leader for this term.
            debug_assert!(
                follower.leader.is_none() || follower.leader == Some(req.leader_id),
                "two leaders in one term"
            );
            if follower.leader != Some(req.leader_id) {
                follower.leader = Some(req.leader_id);
                traces.push(Trace::FollowingLeader {
                    leader: req.leader_id,
                    term: persistent.current_term,
                });
            }
            actions.push(Action::ResetTimer(TimerKind::Election));

            let response =
                follower_append(&mut follower, env, &req, &mut actions, &mut traces)?;
            actions.push(Action::Send {
                to: req.leader_id,
                message: Message::AppendEntriesResponse(response),
            });
        }

        // We are not campaigning and not leading in this term; these are
        // leftovers from an old role or duplicates.
        Message::RequestVoteResponse(_) | Message::AppendEntriesResponse(_) => {}
    }

    Ok(Transition::new(NodeState::Follower(follower), persistent, actions, traces))
}

/// Processes the log portion of an `AppendEntries` request on a follower
/// and builds the response.
fn follower_append(
    follower: &mut FollowerState,
    env: &TransitionEnv<'_>,
    req: &AppendEntriesRequest,
    actions: &mut Vec<Action>,
    traces: &mut Vec<Trace>,
) -> StoreResult<AppendEntriesResponse> {
    let term = req.term;
    let node_id = env.node_id();

    // Consistency check: we must hold the entry the new ones attach to.
    // On failure we report our own last index so the leader can jump its
    // next index straight past the gap.
    let prev_ok = req.prev_log_index.get() == 0
        || env.term_at(req.prev_log_index)? == Some(req.prev_log_term);
    if !prev_ok {
        traces.push(Trace::AppendRejected {
            leader: req.leader_id,
            prev_log_index: req.prev_log_index,
        });
        return Ok(AppendEntriesResponse::new(term, node_id, req.leader_id, false, env.last_index));
    }

    // Keep entries we already hold; once one conflicts (same index,
    // different term) everything from there on is replaced. The emitted
    // append implies truncation of the conflicting suffix.
    let mut to_append = Vec::new();
    let mut diverged = false;
    for entry in &req.entries {
        if !diverged {
            match env.term_at(entry.index)? {
                Some(existing) if existing == entry.term => continue,
                _ => diverged = true,
            }
        }
        to_append.push(entry.clone());
    }
    if !to_append.is_empty() {
        actions.push(Action::AppendLog(to_append));
    }

    // The log now matches the leader up to the last entry of this request.
    let last_new = req.entries.last().map_or(req.prev_log_index, |e| e.index);
    if req.leader_commit > follower.commit_index {
        let commit = req.leader_commit.min(last_new);
        if commit > follower.commit_index {
            follower.commit_index = commit;
            traces.push(Trace::Committed { index: commit });
        }
    }

    let mut response = AppendEntriesResponse::new(term, node_id, req.leader_id, true, last_new);
    if let Some(read) = req.read_request {
        response = response.with_read_request(read);
    }
    Ok(response)
}

fn candidate_message(
    mut candidate: CandidateState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    message: Message,
) -> StoreResult<Transition> {
    match message {
        // A leader emerged in our term; we lost. Follow it and let the
        // follower logic process the append.
        Message::AppendEntries(_) => {
            let follower = FollowerState::new(None, candidate.commit_index, candidate.last_applied);
            follower_message(follower, persistent, env, message)
        }

        Message::RequestVoteResponse(resp) => {
            if resp.vote_granted {
                candidate.votes.insert(resp.from);
                if candidate.votes.len() >= env.config.quorum_size() {
                    return become_leader(candidate, persistent, env, Vec::new());
                }
            }
            Ok(Transition::unchanged(NodeState::Candidate(candidate), persistent))
        }

        // We voted for ourselves; no vote to spare for rival candidates.
        Message::RequestVote(req) => {
            let deny = Action::Send {
                to: req.candidate_id,
                message: Message::RequestVoteResponse(RequestVoteResponse::new(
                    persistent.current_term,
                    env.node_id(),
                    req.candidate_id,
                    false,
                )),
            };
            Ok(Transition::new(
                NodeState::Candidate(candidate),
                persistent,
                vec![deny],
                Vec::new(),
            ))
        }

        // Not a leader in this term; a duplicate or reordered response.
        Message::AppendEntriesResponse(_) => {
            Ok(Transition::unchanged(NodeState::Candidate(candidate), persistent))
        }
    }
}

fn leader_message(
    mut leader: LeaderState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    message: Message,
) -> StoreResult<Transition> {
    let mut actions = Vec::new();
    let mut traces = Vec::new();

    match message {
        Message::AppendEntriesResponse(resp) => {
            let peer = resp.from;
            debug_assert!(leader.next_index.contains_key(&peer), "response from unknown peer");

            if resp.success {
                // Progress: the follower matches us up to match_index.
                let known = leader.match_index.get(&peer).copied().unwrap_or_default();
                if resp.match_index > known {
                    debug_assert!(resp.match_index <= leader.last_index, "match beyond our log");
                    leader.match_index.insert(peer, resp.match_index);
                    let next = resp.match_index.next();
                    if leader.next_index.get(&peer).copied().unwrap_or_default() < next {
                        leader.next_index.insert(peer, next);
                    }
                    maybe_commit(&mut leader, &persistent, env, &mut actions, &mut traces)?;
                }

                // An accepted heartbeat carrying a read serial confirms we
                // are still the leader for that read.
                if let Some(read) = resp.read_request {
                    tally_read_ack(&mut leader, env, peer, read, &mut actions, &mut traces);
                }
            } else {
                // The follower is missing or diverging at prev_log_index.
                // Jump next_index to just past its reported last entry
                // (never below its match index) and resend from there.
                let current = leader.next_index.get(&peer).copied().unwrap_or_default();
                let floor = leader.match_index.get(&peer).copied().unwrap_or_default().next();
                let backtracked = current.get().saturating_sub(1).max(1).min(resp.match_index.get() + 1);
                let next = LogIndex::new(backtracked).max(floor);
                leader.next_index.insert(peer, next);
                actions.push(send_append(&leader, &persistent, env, peer)?);
            }
        }

        // No spare vote in our own term, and late vote grants are moot.
        Message::RequestVote(req) => {
            actions.push(Action::Send {
                to: req.candidate_id,
                message: Message::RequestVoteResponse(RequestVoteResponse::new(
                    persistent.current_term,
                    env.node_id(),
                    req.candidate_id,
                    false,
                )),
            });
        }
        Message::RequestVoteResponse(_) => {}

        // A second leader in our own term would violate election safety.
        Message::AppendEntries(_) => {
            debug_assert!(false, "two leaders in one term");
        }
    }

    Ok(Transition::new(NodeState::Leader(leader), persistent, actions, traces))
}

// ---------------------------------------------------------------------------
// Client requests

fn handle_client(
    state: NodeState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    request: ClientRequest,
) -> StoreResult<Transition> {
    match state {
        // Followers point the client at the leader they follow.
        NodeState::Follower(follower) => {
            let respond = Action::Respond {
                client: request.client,
                response: ClientResponse::Redirect(follower.leader),
            };
            Ok(Transition::new(
                NodeState::Follower(follower),
                persistent,
                vec![respond],
                Vec::new(),
            ))
        }

        // Mid-election there is no leader to point at.
        NodeState::Candidate(candidate) => {
            let respond = Action::Respond {
                client: request.client,
                response: ClientResponse::Redirect(None),
            };
            Ok(Transition::new(
                NodeState::Candidate(candidate),
                persistent,
                vec![respond],
                Vec::new(),
            ))
        }

        NodeState::Leader(leader) => match request.body {
            RequestBody::Write(command) => {
                leader_write(leader, persistent, env, request.client, command)
            }
            RequestBody::Read => leader_read(leader, persistent, env, request.client),
        },
    }
}

/// Appends a client command to the log and replicates it.
fn leader_write(
    mut leader: LeaderState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    client: ClientId,
    command: Bytes,
) -> StoreResult<Transition> {
    let term = persistent.current_term;
    let entry = LogEntry::command(leader.last_index.next(), term, client, command);

    leader.pending_writes.insert(entry.index, client);

    let replicate = Message::AppendEntries(AppendEntriesRequest::new(
        term,
        env.node_id(),
        env.node_id(),
        leader.last_index,
        leader.last_term,
        vec![entry.clone()],
        leader.commit_index,
    ));

    leader.last_index = entry.index;
    leader.last_term = term;

    let mut actions = vec![
        Action::AppendLog(vec![entry]),
        Action::Broadcast { to: env.config.peers(), message: replicate },
    ];
    let mut traces = Vec::new();

    // A single-node cluster commits on its own.
    maybe_commit(&mut leader, &persistent, env, &mut actions, &mut traces)?;

    Ok(Transition::new(NodeState::Leader(leader), persistent, actions, traces))
}

/// Registers a linearizable read and broadcasts the heartbeat that must be
/// quorum-acknowledged before the read is served.
fn leader_read(
    mut leader: LeaderState,
    persistent: PersistentState,
    env: &TransitionEnv<'_>,
    client: ClientId,
) -> StoreResult<Transition> {
    let read = leader.read_seq.next();
    leader.read_seq = read;

    let mut acks = std::collections::HashSet::new();
    acks.insert(env.node_id());
    leader.pending_reads.insert(read, PendingRead { client, acks });

    let mut actions = Vec::new();
    let mut traces = Vec::new();

    if env.config.peers().is_empty() {
        // Single-node cluster: our own ack is the quorum.
        serve_read(&mut leader, env, read, &mut actions, &mut traces);
    } else {
        let hb = heartbeat(&leader, &persistent, env.node_id(), Some(read));
        actions.push(hb);
    }

    Ok(Transition::new(NodeState::Leader(leader), persistent, actions, traces))
}

// ---------------------------------------------------------------------------
// Leader helpers

/// Builds a broadcast heartbeat: an empty `AppendEntries` based at the
/// leader's own last entry. An up-to-date follower acks it; a lagging one
/// rejects it and reports how far behind it is.
fn heartbeat(
    leader: &LeaderState,
    persistent: &PersistentState,
    leader_id: NodeId,
    read: Option<ReadSeq>,
) -> Action {
    let mut request = AppendEntriesRequest::heartbeat(
        persistent.current_term,
        leader_id,
        leader_id,
        leader.last_index,
        leader.last_term,
        leader.commit_index,
    );
    if let Some(read) = read {
        request = request.with_read_request(read);
    }

    let mut peers: Vec<NodeId> = leader.next_index.keys().copied().collect();
    peers.sort_unstable();
    Action::Broadcast { to: peers, message: Message::AppendEntries(request) }
}

/// Builds a catch-up `AppendEntries` for one peer from its next index.
fn send_append(
    leader: &LeaderState,
    persistent: &PersistentState,
    env: &TransitionEnv<'_>,
    peer: NodeId,
) -> StoreResult<Action> {
    let next = leader.next_index.get(&peer).copied().unwrap_or_default();
    debug_assert!(next.get() >= 1, "next_index below 1");

    let (prev_index, prev_term) = env.prev_of(next)?;
    let entries = env.entries_from(next)?;

    let request = AppendEntriesRequest::new(
        persistent.current_term,
        env.node_id(),
        peer,
        prev_index,
        prev_term,
        entries,
        leader.commit_index,
    );
    Ok(Action::Send { to: peer, message: Message::AppendEntries(request) })
}

/// Advances the commit index to the highest quorum-replicated entry of the
/// leader's own term, answering the clients whose writes just committed.
///
/// Entries from earlier terms commit only transitively: the quorum index
/// must itself carry the current term (figure 8 in the Raft paper).
fn maybe_commit(
    leader: &mut LeaderState,
    persistent: &PersistentState,
    env: &TransitionEnv<'_>,
    actions: &mut Vec<Action>,
    traces: &mut Vec<Trace>,
) -> StoreResult<()> {
    let mut indexes: Vec<LogIndex> = leader.match_index.values().copied().collect();
    indexes.push(leader.last_index);
    indexes.sort_unstable_by(|a, b| b.cmp(a));
    let quorum_index = indexes[env.config.quorum_size() - 1];

    if quorum_index <= leader.commit_index {
        return Ok(());
    }

    // Log terms are non-decreasing, so checking the quorum index alone
    // suffices. The leader's own tail may not have reached the store yet;
    // its cached last term covers that case.
    let term = if quorum_index == leader.last_index {
        leader.last_term
    } else {
        env.term_at(quorum_index)?.ok_or_else(|| StoreError::Corruption {
            message: format!("missing log entry at {quorum_index}"),
        })?
    };
    if term != persistent.current_term {
        return Ok(());
    }

    for raw in (leader.commit_index.get() + 1)..=quorum_index.get() {
        let index = LogIndex::new(raw);
        if let Some(client) = leader.pending_writes.remove(&index) {
            actions.push(Action::Respond { client, response: ClientResponse::Write(index) });
        }
    }
    leader.commit_index = quorum_index;
    traces.push(Trace::Committed { index: quorum_index });
    Ok(())
}

/// Records a heartbeat ack for a read serial; a quorum serves the read.
fn tally_read_ack(
    leader: &mut LeaderState,
    env: &TransitionEnv<'_>,
    peer: NodeId,
    read: ReadSeq,
    actions: &mut Vec<Action>,
    traces: &mut Vec<Trace>,
) {
    let quorum = env.config.quorum_size();
    let ready = match leader.pending_reads.get_mut(&read) {
        Some(pending) => {
            pending.acks.insert(peer);
            pending.acks.len() >= quorum
        }
        // Already served, or from a lost term; duplicates are harmless.
        None => false,
    };
    if ready {
        serve_read(leader, env, read, actions, traces);
    }
}

/// Serves a confirmed read with the applied machine snapshot.
fn serve_read(
    leader: &mut LeaderState,
    env: &TransitionEnv<'_>,
    read: ReadSeq,
    actions: &mut Vec<Action>,
    traces: &mut Vec<Trace>,
) {
    let Some(pending) = leader.pending_reads.remove(&read) else {
        return;
    };
    traces.push(Trace::ReadConfirmed { read, client: pending.client });
    actions.push(Action::Respond {
        client: pending.client,
        response: ClientResponse::Read(env.snapshot.clone()),
    });
}

/// Answers every client still waiting on a leader that is stepping down.
/// The new leader is unknown at this point, so clients get a bare redirect
/// and retry.
fn abort_pending(state: &NodeState) -> Vec<Action> {
    let NodeState::Leader(leader) = state else {
        return Vec::new();
    };

    let mut writes: Vec<_> = leader.pending_writes.iter().collect();
    writes.sort_unstable_by_key(|(index, _)| **index);
    let mut reads: Vec<_> = leader.pending_reads.iter().collect();
    reads.sort_unstable_by_key(|(read, _)| **read);

    writes
        .into_iter()
        .map(|(_, &client)| client)
        .chain(reads.into_iter().map(|(_, pending)| pending.client))
        .map(|client| Action::Respond { client, response: ClientResponse::Redirect(None) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::EntryPayload;
    use crate::storage::MemoryStore;

    const N1: NodeId = NodeId::new(1);
    const N2: NodeId = NodeId::new(2);
    const N3: NodeId = NodeId::new(3);

    fn config() -> RaftConfig {
        RaftConfig::new(N1, vec![N1, N2, N3])
    }

    fn solo_config() -> RaftConfig {
        RaftConfig::new(N1, vec![N1])
    }

    fn env<'a>(config: &'a RaftConfig, store: &'a MemoryStore) -> TransitionEnv<'a> {
        TransitionEnv::new(config, store, Bytes::from_static(b"snap")).unwrap()
    }

    fn store_with(terms: &[u64]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (i, &term) in terms.iter().enumerate() {
            store
                .append(&[LogEntry::noop(LogIndex::new(i as u64 + 1), TermId::new(term))])
                .unwrap();
        }
        store
    }

    fn follower_at(term: u64, leader: Option<NodeId>) -> (NodeState, PersistentState) {
        let state = NodeState::Follower(FollowerState::new(
            leader,
            LogIndex::new(0),
            LogIndex::new(0),
        ));
        let persistent =
            PersistentState { current_term: TermId::new(term), voted_for: None };
        (state, persistent)
    }

    /// Steps an election timeout and expects a candidate soliciting votes.
    #[test]
    fn test_election_timeout_starts_election() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();

        assert_eq!(t.persistent.current_term, TermId::new(1));
        assert_eq!(t.persistent.voted_for, Some(N1));
        let NodeState::Candidate(candidate) = &t.state else {
            panic!("expected candidate");
        };
        assert!(candidate.votes.contains(&N1));

        let Action::Broadcast { to, message } = &t.actions[0] else {
            panic!("expected broadcast");
        };
        assert_eq!(to, &vec![N2, N3]);
        let Message::RequestVote(req) = message else {
            panic!("expected vote solicitation");
        };
        assert_eq!(req.term, TermId::new(1));
        assert_eq!(req.last_log_index, LogIndex::new(0));
        assert_eq!(t.actions[1], Action::ResetTimer(TimerKind::Election));
    }

    /// A candidate that times out re-campaigns at a higher term.
    #[test]
    fn test_split_vote_retries_higher_term() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t1 = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();
        let t2 = handle_event(
            t1.state,
            t1.persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();

        assert_eq!(t2.persistent.current_term, TermId::new(2));
        assert!(matches!(t2.state, NodeState::Candidate(_)));
    }

    /// A single-node cluster elects itself and commits the no-op at once.
    #[test]
    fn test_single_node_wins_immediately() {
        let config = solo_config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();

        let NodeState::Leader(leader) = &t.state else {
            panic!("expected leader");
        };
        assert_eq!(leader.commit_index, LogIndex::new(1));
        assert!(t.actions.contains(&Action::AppendLog(vec![LogEntry::noop(
            LogIndex::new(1),
            TermId::new(1)
        )])));
        assert!(t.traces.contains(&Trace::BecameLeader { term: TermId::new(1) }));
    }

    /// Votes are granted once per term, idempotently for the same candidate.
    #[test]
    fn test_vote_granted_and_repeatable() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(1, None);

        let request = Message::RequestVote(RequestVoteRequest::new(
            TermId::new(1),
            N2,
            N1,
            LogIndex::new(0),
            TermId::new(0),
        ));

        let t1 = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(request.clone()),
        )
        .unwrap();
        assert_eq!(t1.persistent.voted_for, Some(N2));
        let grant = Action::Send {
            to: N2,
            message: Message::RequestVoteResponse(RequestVoteResponse::new(
                TermId::new(1),
                N1,
                N2,
                true,
            )),
        };
        assert!(t1.actions.contains(&grant));

        // Delivering the same solicitation again yields the same decision.
        let t2 = handle_event(
            t1.state,
            t1.persistent,
            &env(&config, &store),
            Event::Message(request),
        )
        .unwrap();
        assert_eq!(t2.persistent.voted_for, Some(N2));
        assert!(t2.actions.contains(&grant));
    }

    /// Only one vote per term: a second candidate is denied.
    #[test]
    fn test_vote_denied_when_already_cast() {
        let config = config();
        let store = MemoryStore::new();
        let (state, _) = follower_at(1, None);
        let persistent =
            PersistentState { current_term: TermId::new(1), voted_for: Some(N2) };

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::RequestVote(RequestVoteRequest::new(
                TermId::new(1),
                N3,
                N1,
                LogIndex::new(0),
                TermId::new(0),
            ))),
        )
        .unwrap();

        assert_eq!(t.persistent.voted_for, Some(N2));
        assert!(t.actions.contains(&Action::Send {
            to: N3,
            message: Message::RequestVoteResponse(RequestVoteResponse::new(
                TermId::new(1),
                N1,
                N3,
                false,
            )),
        }));
    }

    /// Votes go only to candidates whose log is at least as up to date.
    #[test]
    fn test_vote_denied_for_outdated_log() {
        let config = config();
        let store = store_with(&[1, 1, 2]);

        for (last_index, last_term) in [(2, 2), (3, 1)] {
            let (state, persistent) = follower_at(3, None);
            let t = handle_event(
                state,
                persistent,
                &env(&config, &store),
                Event::Message(Message::RequestVote(RequestVoteRequest::new(
                    TermId::new(3),
                    N2,
                    N1,
                    LogIndex::new(last_index),
                    TermId::new(last_term),
                ))),
            )
            .unwrap();

            assert_eq!(t.persistent.voted_for, None, "({last_index}, {last_term})");
        }

        // Equally up to date is good enough.
        let (state, persistent) = follower_at(3, None);
        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::RequestVote(RequestVoteRequest::new(
                TermId::new(3),
                N2,
                N1,
                LogIndex::new(3),
                TermId::new(2),
            ))),
        )
        .unwrap();
        assert_eq!(t.persistent.voted_for, Some(N2));
    }

    /// A vote quorum turns the candidate into a leader with a no-op entry.
    #[test]
    fn test_candidate_wins_with_quorum() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::RequestVoteResponse(RequestVoteResponse::new(
                TermId::new(1),
                N2,
                N1,
                true,
            ))),
        )
        .unwrap();

        let NodeState::Leader(leader) = &t.state else {
            panic!("expected leader");
        };
        assert_eq!(leader.last_index, LogIndex::new(1));
        assert_eq!(leader.next_index[&N2], LogIndex::new(2));
        assert_eq!(leader.match_index[&N2], LogIndex::new(0));
        assert!(t.actions.contains(&Action::AppendLog(vec![LogEntry::noop(
            LogIndex::new(1),
            TermId::new(1)
        )])));
        assert!(t.actions.contains(&Action::ResetTimer(TimerKind::Heartbeat)));

        // The no-op broadcast attaches at the empty log.
        let broadcast = t.actions.iter().find_map(|a| match a {
            Action::Broadcast { message: Message::AppendEntries(req), .. } => Some(req),
            _ => None,
        });
        let req = broadcast.expect("expected append broadcast");
        assert_eq!(req.prev_log_index, LogIndex::new(0));
        assert_eq!(req.entries.len(), 1);
    }

    /// A denied vote does not count towards the quorum.
    #[test]
    fn test_candidate_ignores_denied_votes() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::RequestVoteResponse(RequestVoteResponse::new(
                TermId::new(1),
                N2,
                N1,
                false,
            ))),
        )
        .unwrap();

        assert!(matches!(t.state, NodeState::Candidate(_)));
    }

    /// A candidate that sees a leader in its term steps down and accepts.
    #[test]
    fn test_candidate_follows_new_leader() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::new(
                TermId::new(1),
                N2,
                N1,
                LogIndex::new(0),
                TermId::new(0),
                vec![LogEntry::noop(LogIndex::new(1), TermId::new(1))],
                LogIndex::new(0),
            ))),
        )
        .unwrap();

        let NodeState::Follower(follower) = &t.state else {
            panic!("expected follower");
        };
        assert_eq!(follower.leader, Some(N2));
        assert!(t.actions.contains(&Action::AppendLog(vec![LogEntry::noop(
            LogIndex::new(1),
            TermId::new(1)
        )])));
    }

    /// An empty log accepts entries attached before the first index.
    #[test]
    fn test_append_at_base_zero() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(1, Some(N2));

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::new(
                TermId::new(1),
                N2,
                N1,
                LogIndex::new(0),
                TermId::new(0),
                vec![LogEntry::noop(LogIndex::new(1), TermId::new(1))],
                LogIndex::new(0),
            ))),
        )
        .unwrap();

        let accept = Action::Send {
            to: N2,
            message: Message::AppendEntriesResponse(AppendEntriesResponse::new(
                TermId::new(1),
                N1,
                N2,
                true,
                LogIndex::new(1),
            )),
        };
        assert!(t.actions.contains(&accept));
    }

    /// Appending the same entries twice yields the same state and response.
    #[test]
    fn test_append_idempotent() {
        let config = config();
        let store = store_with(&[1, 1]);
        let (state, persistent) = follower_at(1, Some(N2));

        let request = Message::AppendEntries(AppendEntriesRequest::new(
            TermId::new(1),
            N2,
            N1,
            LogIndex::new(0),
            TermId::new(0),
            vec![
                LogEntry::noop(LogIndex::new(1), TermId::new(1)),
                LogEntry::noop(LogIndex::new(2), TermId::new(1)),
            ],
            LogIndex::new(0),
        ));

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(request.clone()),
        )
        .unwrap();

        // Both entries are already present: nothing to append, same ack.
        assert!(!t.actions.iter().any(|a| matches!(a, Action::AppendLog(_))));
        let ack = Action::Send {
            to: N2,
            message: Message::AppendEntriesResponse(AppendEntriesResponse::new(
                TermId::new(1),
                N1,
                N2,
                true,
                LogIndex::new(2),
            )),
        };
        assert!(t.actions.contains(&ack));

        let t2 = handle_event(
            t.state.clone(),
            t.persistent.clone(),
            &env(&config, &store),
            Event::Message(request),
        )
        .unwrap();
        assert_eq!(t2.state, t.state);
        assert!(t2.actions.contains(&ack));
    }

    /// A conflicting suffix is replaced from the divergence point on.
    #[test]
    fn test_append_replaces_conflicting_suffix() {
        let config = config();
        let store = store_with(&[1, 1, 2]);
        let (state, persistent) = follower_at(3, Some(N2));

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::new(
                TermId::new(3),
                N2,
                N1,
                LogIndex::new(1),
                TermId::new(1),
                vec![
                    LogEntry::noop(LogIndex::new(2), TermId::new(1)),
                    LogEntry::noop(LogIndex::new(3), TermId::new(3)),
                    LogEntry::noop(LogIndex::new(4), TermId::new(3)),
                ],
                LogIndex::new(0),
            ))),
        )
        .unwrap();

        // Entry 2 matches and is kept; 3 conflicts (term 2 vs 3) and the
        // suffix from there is replaced.
        assert!(t.actions.contains(&Action::AppendLog(vec![
            LogEntry::noop(LogIndex::new(3), TermId::new(3)),
            LogEntry::noop(LogIndex::new(4), TermId::new(3)),
        ])));
    }

    /// A missing base entry rejects, reporting the follower's last index.
    #[test]
    fn test_append_rejects_missing_base() {
        let config = config();
        let store = store_with(&[1]);
        let (state, persistent) = follower_at(1, Some(N2));

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::new(
                TermId::new(1),
                N2,
                N1,
                LogIndex::new(5),
                TermId::new(1),
                vec![LogEntry::noop(LogIndex::new(6), TermId::new(1))],
                LogIndex::new(0),
            ))),
        )
        .unwrap();

        let reject = Action::Send {
            to: N2,
            message: Message::AppendEntriesResponse(AppendEntriesResponse::new(
                TermId::new(1),
                N1,
                N2,
                false,
                LogIndex::new(1),
            )),
        };
        assert!(t.actions.contains(&reject));
        assert!(t
            .traces
            .contains(&Trace::AppendRejected { leader: N2, prev_log_index: LogIndex::new(5) }));
    }

    /// The follower's commit index tracks min(leader commit, last new).
    #[test]
    fn test_follower_commit_capped_by_log() {
        let config = config();
        let store = store_with(&[1, 1]);
        let (state, persistent) = follower_at(1, Some(N2));

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::heartbeat(
                TermId::new(1),
                N2,
                N1,
                LogIndex::new(2),
                TermId::new(1),
                LogIndex::new(7),
            ))),
        )
        .unwrap();

        assert_eq!(t.state.commit_index(), LogIndex::new(2));
        assert!(t.traces.contains(&Trace::Committed { index: LogIndex::new(2) }));
    }

    /// Stale messages are answered with the current term and nothing else.
    #[test]
    fn test_stale_message_rejected() {
        let config = config();
        let store = store_with(&[1, 2]);
        let (state, persistent) = follower_at(3, Some(N2));

        let t = handle_event(
            state.clone(),
            persistent.clone(),
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::heartbeat(
                TermId::new(2),
                N3,
                N1,
                LogIndex::new(2),
                TermId::new(2),
                LogIndex::new(2),
            ))),
        )
        .unwrap();

        assert_eq!(t.state, state);
        assert_eq!(
            t.actions,
            vec![Action::Send {
                to: N3,
                message: Message::AppendEntriesResponse(AppendEntriesResponse::new(
                    TermId::new(3),
                    N1,
                    N3,
                    false,
                    LogIndex::new(2),
                )),
            }]
        );
        assert!(t.traces.contains(&Trace::StaleMessage { from: N3, term: TermId::new(2) }));
    }

    /// Any message from a higher term advances the term and clears the vote.
    #[test]
    fn test_higher_term_steps_down() {
        let config = config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        // Become a candidate in term 1 first.
        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();

        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::RequestVote(RequestVoteRequest::new(
                TermId::new(5),
                N3,
                N1,
                LogIndex::new(0),
                TermId::new(0),
            ))),
        )
        .unwrap();

        assert_eq!(t.persistent.current_term, TermId::new(5));
        assert!(matches!(t.state, NodeState::Follower(_)));
        assert!(t.traces.contains(&Trace::TermAdvanced { term: TermId::new(5) }));
        // The vote is re-castable in the new term and goes to the sender.
        assert_eq!(t.persistent.voted_for, Some(N3));
    }

    fn elected_leader(config: &RaftConfig, store: &MemoryStore) -> (NodeState, PersistentState) {
        let (state, persistent) = follower_at(0, None);
        let t = handle_event(
            state,
            persistent,
            &env(config, store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(config, store),
            Event::Message(Message::RequestVoteResponse(RequestVoteResponse::new(
                TermId::new(1),
                N2,
                N1,
                true,
            ))),
        )
        .unwrap();
        assert!(t.state.is_leader());
        (t.state, t.persistent)
    }

    /// A leader write appends, replicates, and tracks the pending client.
    #[test]
    fn test_leader_write_replicates() {
        let config = config();
        let mut store = MemoryStore::new();
        let (state, persistent) = elected_leader(&config, &store);
        // The host has made the no-op durable by now.
        store.append(&[LogEntry::noop(LogIndex::new(1), TermId::new(1))]).unwrap();

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::write(ClientId::new(9), Bytes::from_static(b"cmd"))),
        )
        .unwrap();

        let NodeState::Leader(leader) = &t.state else {
            panic!("expected leader");
        };
        assert_eq!(leader.last_index, LogIndex::new(2));
        assert_eq!(leader.pending_writes[&LogIndex::new(2)], ClientId::new(9));

        let entry = LogEntry::command(
            LogIndex::new(2),
            TermId::new(1),
            ClientId::new(9),
            Bytes::from_static(b"cmd"),
        );
        assert!(t.actions.contains(&Action::AppendLog(vec![entry.clone()])));
        let broadcast = t.actions.iter().find_map(|a| match a {
            Action::Broadcast { message: Message::AppendEntries(req), .. } => Some(req),
            _ => None,
        });
        let req = broadcast.expect("expected replication broadcast");
        assert_eq!(req.prev_log_index, LogIndex::new(1));
        assert_eq!(req.entries, vec![entry]);
    }

    /// The commit index advances once a quorum matches, answering writers.
    #[test]
    fn test_commit_advances_on_quorum() {
        let config = config();
        let mut store = MemoryStore::new();
        let (state, persistent) = elected_leader(&config, &store);
        store.append(&[LogEntry::noop(LogIndex::new(1), TermId::new(1))]).unwrap();

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::write(ClientId::new(9), Bytes::from_static(b"cmd"))),
        )
        .unwrap();
        store
            .append(&[LogEntry::command(
                LogIndex::new(2),
                TermId::new(1),
                ClientId::new(9),
                Bytes::from_static(b"cmd"),
            )])
            .unwrap();

        // One ack up to index 2 is a quorum of three with the leader.
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(
                AppendEntriesResponse::new(TermId::new(1), N2, N1, true, LogIndex::new(2)),
            )),
        )
        .unwrap();

        let NodeState::Leader(leader) = &t.state else {
            panic!("expected leader");
        };
        assert_eq!(leader.commit_index, LogIndex::new(2));
        assert_eq!(leader.match_index[&N2], LogIndex::new(2));
        assert_eq!(leader.next_index[&N2], LogIndex::new(3));
        assert!(leader.pending_writes.is_empty());
        assert!(t.actions.contains(&Action::Respond {
            client: ClientId::new(9),
            response: ClientResponse::Write(LogIndex::new(2)),
        }));
        assert!(t.traces.contains(&Trace::Committed { index: LogIndex::new(2) }));
    }

    /// Entries from an earlier term never commit directly, only once an
    /// entry of the current term reaches the quorum.
    #[test]
    fn test_commit_requires_current_term_entry() {
        let config = config();
        // Log: an old-term entry below a current-term entry.
        let store = store_with(&[1, 3]);
        let persistent =
            PersistentState { current_term: TermId::new(3), voted_for: Some(N1) };
        let state = NodeState::Leader(LeaderState::new(
            &[N2, N3],
            LogIndex::new(2),
            TermId::new(3),
            LogIndex::new(0),
            LogIndex::new(0),
        ));

        // A quorum matches only the old-term entry: no commit.
        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(
                AppendEntriesResponse::new(TermId::new(3), N2, N1, true, LogIndex::new(1)),
            )),
        )
        .unwrap();
        assert_eq!(t.state.commit_index(), LogIndex::new(0));

        // A quorum on the current-term entry commits both transitively.
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(
                AppendEntriesResponse::new(TermId::new(3), N3, N1, true, LogIndex::new(2)),
            )),
        )
        .unwrap();
        assert_eq!(t.state.commit_index(), LogIndex::new(2));
    }

    /// A rejection jumps next_index past the follower's reported last
    /// entry and resends the missing suffix.
    #[test]
    fn test_rejection_backtracks_and_resends() {
        let config = config();
        let store = store_with(&[1, 1, 1]);
        let persistent =
            PersistentState { current_term: TermId::new(1), voted_for: Some(N1) };
        let state = NodeState::Leader(LeaderState::new(
            &[N2, N3],
            LogIndex::new(3),
            TermId::new(1),
            LogIndex::new(0),
            LogIndex::new(0),
        ));

        // N2 rejects the heartbeat based at index 3; it only has 1 entry.
        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(
                AppendEntriesResponse::new(TermId::new(1), N2, N1, false, LogIndex::new(1)),
            )),
        )
        .unwrap();

        let NodeState::Leader(leader) = &t.state else {
            panic!("expected leader");
        };
        assert_eq!(leader.next_index[&N2], LogIndex::new(2));

        let resend = t.actions.iter().find_map(|a| match a {
            Action::Send { to, message: Message::AppendEntries(req) } if *to == N2 => Some(req),
            _ => None,
        });
        let req = resend.expect("expected catch-up send");
        assert_eq!(req.prev_log_index, LogIndex::new(1));
        assert_eq!(req.prev_log_term, TermId::new(1));
        assert_eq!(
            req.entries,
            vec![
                LogEntry::noop(LogIndex::new(2), TermId::new(1)),
                LogEntry::noop(LogIndex::new(3), TermId::new(1)),
            ]
        );
    }

    /// A heartbeat timeout broadcasts an empty append at the leader's tail.
    #[test]
    fn test_heartbeat_broadcast() {
        let config = config();
        let mut store = MemoryStore::new();
        let (state, persistent) = elected_leader(&config, &store);
        store.append(&[LogEntry::noop(LogIndex::new(1), TermId::new(1))]).unwrap();

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Heartbeat),
        )
        .unwrap();

        let Action::Broadcast { to, message: Message::AppendEntries(req) } = &t.actions[0] else {
            panic!("expected heartbeat broadcast");
        };
        assert_eq!(to, &vec![N2, N3]);
        assert!(req.is_heartbeat());
        assert_eq!(req.prev_log_index, LogIndex::new(1));
        assert_eq!(t.actions[1], Action::ResetTimer(TimerKind::Heartbeat));
    }

    /// A read is served only after a heartbeat quorum acks its serial.
    #[test]
    fn test_read_waits_for_quorum() {
        let config = config();
        let mut store = MemoryStore::new();
        let (state, persistent) = elected_leader(&config, &store);
        store.append(&[LogEntry::noop(LogIndex::new(1), TermId::new(1))]).unwrap();

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::read(ClientId::new(9))),
        )
        .unwrap();

        // The heartbeat carries the serial; no response yet.
        let Action::Broadcast { message: Message::AppendEntries(req), .. } = &t.actions[0] else {
            panic!("expected heartbeat broadcast");
        };
        assert_eq!(req.read_request, Some(ReadSeq::new(1)));
        assert!(!t.actions.iter().any(|a| matches!(a, Action::Respond { .. })));

        // The first echoed ack completes the quorum of three.
        let ack = AppendEntriesResponse::new(TermId::new(1), N2, N1, true, LogIndex::new(1))
            .with_read_request(ReadSeq::new(1));
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(ack)),
        )
        .unwrap();

        assert!(t.actions.contains(&Action::Respond {
            client: ClientId::new(9),
            response: ClientResponse::Read(Bytes::from_static(b"snap")),
        }));
        assert!(t
            .traces
            .contains(&Trace::ReadConfirmed { read: ReadSeq::new(1), client: ClientId::new(9) }));
        let NodeState::Leader(leader) = &t.state else {
            panic!("expected leader");
        };
        assert!(leader.pending_reads.is_empty());
    }

    /// Duplicate read acks from the same peer do not fake a quorum.
    #[test]
    fn test_read_ack_is_per_peer() {
        let config = RaftConfig::new(N1, vec![N1, N2, N3, NodeId::new(4), NodeId::new(5)]);
        let mut store = MemoryStore::new();
        let (state, persistent) = elected_leader(&config, &store);
        store.append(&[LogEntry::noop(LogIndex::new(1), TermId::new(1))]).unwrap();

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::read(ClientId::new(9))),
        )
        .unwrap();

        // Two acks from the same node leave the ballot at two of five.
        let ack = AppendEntriesResponse::new(TermId::new(1), N2, N1, true, LogIndex::new(1))
            .with_read_request(ReadSeq::new(1));
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(ack)),
        )
        .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntriesResponse(ack)),
        )
        .unwrap();

        assert!(!t.actions.iter().any(|a| matches!(a, Action::Respond { .. })));
    }

    /// A deposed leader redirects every waiting client.
    #[test]
    fn test_stepdown_aborts_pending_clients() {
        let config = config();
        let mut store = MemoryStore::new();
        let (state, persistent) = elected_leader(&config, &store);
        store.append(&[LogEntry::noop(LogIndex::new(1), TermId::new(1))]).unwrap();

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::write(ClientId::new(8), Bytes::from_static(b"w"))),
        )
        .unwrap();
        store
            .append(&[LogEntry::command(
                LogIndex::new(2),
                TermId::new(1),
                ClientId::new(8),
                Bytes::from_static(b"w"),
            )])
            .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::read(ClientId::new(9))),
        )
        .unwrap();

        // A higher-term heartbeat deposes us.
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Message(Message::AppendEntries(AppendEntriesRequest::heartbeat(
                TermId::new(2),
                N2,
                N1,
                LogIndex::new(0),
                TermId::new(0),
                LogIndex::new(0),
            ))),
        )
        .unwrap();

        assert!(matches!(t.state, NodeState::Follower(_)));
        assert!(t.actions.contains(&Action::Respond {
            client: ClientId::new(8),
            response: ClientResponse::Redirect(None),
        }));
        assert!(t.actions.contains(&Action::Respond {
            client: ClientId::new(9),
            response: ClientResponse::Redirect(None),
        }));
    }

    /// Followers redirect clients to their leader; candidates to nobody.
    #[test]
    fn test_client_redirects() {
        let config = config();
        let store = MemoryStore::new();

        let (state, persistent) = follower_at(1, Some(N2));
        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::read(ClientId::new(9))),
        )
        .unwrap();
        assert_eq!(
            t.actions,
            vec![Action::Respond {
                client: ClientId::new(9),
                response: ClientResponse::Redirect(Some(N2)),
            }]
        );

        let (state, persistent) = follower_at(0, None);
        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();
        let t = handle_event(
            t.state,
            t.persistent,
            &env(&config, &store),
            Event::Client(ClientRequest::write(ClientId::new(9), Bytes::from_static(b"w"))),
        )
        .unwrap();
        assert_eq!(
            t.actions,
            vec![Action::Respond {
                client: ClientId::new(9),
                response: ClientResponse::Redirect(None),
            }]
        );
    }

    /// The leader's own no-op stays unacknowledged after commit.
    #[test]
    fn test_noop_commit_has_no_client_response() {
        let config = solo_config();
        let store = MemoryStore::new();
        let (state, persistent) = follower_at(0, None);

        let t = handle_event(
            state,
            persistent,
            &env(&config, &store),
            Event::Timeout(TimerKind::Election),
        )
        .unwrap();

        assert_eq!(t.state.commit_index(), LogIndex::new(1));
        assert!(!t.actions.iter().any(|a| matches!(a, Action::Respond { .. })));
        let appended = t.actions.iter().find_map(|a| match a {
            Action::AppendLog(entries) => Some(entries),
            _ => None,
        });
        assert!(appended.unwrap()[0].payload.is_noop());
        assert!(matches!(appended.unwrap()[0].payload, EntryPayload::Noop));
    }
}
