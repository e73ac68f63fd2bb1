//! The consensus role state machine: log append/apply/vote/snapshot
//! install, plus the applier and replicator cooperative tasks (spec §3
//! "Raft actor state", §4.6).
//!
//! Grounded throughout in `examples/original_source/include/cocaine/detail/raft/actor.hpp`
//! for the exact algorithm (role transitions, append/vote/install-snapshot
//! receiver logic, the median-match-index commit rule, the applier's
//! snapshot-then-commands batching) and in the teacher's
//! `examples/simon-fu-async-raft/async-raft/src/core/mod.rs` for the
//! tokio shape: a single spawned reactor task owning all mutable state,
//! reached only through an `mpsc` channel, publishing a `watch`-backed
//! metrics snapshot (SPEC_FULL §2.6, §2.9).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::RaftError;

use super::config::RaftOptions;
use super::entry::{EntryValue, LogEntry};
use super::log::{Log, StateMachine};
use super::metrics::{self, RaftMetrics};
use super::remote::{
    AppendEntriesRequest, InstallSnapshotRequest, NetworkFactory, RaftNetwork, RemotePeer,
    RequestVoteReply, RequestVoteRequest, RpcReply,
};

/// Consensus role (spec §4.6, initial: Follower).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

enum RaftMsg<C, R> {
    AppendEntriesRpc(AppendEntriesRequest<C>, oneshot::Sender<RpcReply>),
    RequestVoteRpc(RequestVoteRequest, oneshot::Sender<RequestVoteReply>),
    InstallSnapshotRpc(InstallSnapshotRequest, oneshot::Sender<RpcReply>),
    Call(C, oneshot::Sender<Result<R, RaftError>>),
    AppendReply {
        peer_id: u64,
        sent_up_to: u64,
        client: Option<Arc<dyn RaftNetwork<C>>>,
        reply: anyhow::Result<RpcReply>,
    },
    InstallSnapshotReply {
        peer_id: u64,
        snapshot_index: u64,
        client: Option<Arc<dyn RaftNetwork<C>>>,
        reply: anyhow::Result<RpcReply>,
    },
    VoteReply {
        peer_id: u64,
        term_sent: u64,
        reply: anyhow::Result<RequestVoteReply>,
    },
    ConnectFailed {
        peer_id: u64,
    },
    ElectionTimeout(u64),
    HeartbeatTick(u64),
}

/// A handle to a running Raft actor (spec §4.6). Cloning shares the same
/// underlying reactor.
#[derive(Clone)]
pub struct RaftHandle<C, R> {
    tx: mpsc::UnboundedSender<RaftMsg<C, R>>,
    leader_hint_rx: watch::Receiver<Option<u64>>,
    metrics_rx: watch::Receiver<RaftMetrics>,
    join: Arc<JoinHandle<()>>,
}

impl<C, R> RaftHandle<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// Readable from any thread without posting to the reactor (spec §5
    /// "the Raft actor's `leader_hint` is likewise synchronized").
    pub fn leader_hint(&self) -> Option<u64> {
        *self.leader_hint_rx.borrow()
    }

    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.metrics_rx.clone()
    }

    /// `call<Event>(args, continuation)` (spec §4.6), expressed as an
    /// async call whose future resolves to what the continuation would
    /// have received.
    pub async fn call(&self, command: C) -> Result<R, RaftError> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RaftMsg::Call(command, tx)).is_err() {
            return Err(RaftError::Unknown);
        }
        rx.await.unwrap_or(Err(RaftError::Unknown))
    }

    pub async fn append_entries(&self, req: AppendEntriesRequest<C>) -> RpcReply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RaftMsg::AppendEntriesRpc(req, tx)).is_err() {
            return RpcReply {
                term: 0,
                success: false,
            };
        }
        rx.await.unwrap_or(RpcReply {
            term: 0,
            success: false,
        })
    }

    pub async fn request_vote(&self, req: RequestVoteRequest) -> RequestVoteReply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RaftMsg::RequestVoteRpc(req, tx)).is_err() {
            return RequestVoteReply {
                term: 0,
                vote_granted: false,
            };
        }
        rx.await.unwrap_or(RequestVoteReply {
            term: 0,
            vote_granted: false,
        })
    }

    pub async fn install_snapshot(&self, req: InstallSnapshotRequest) -> RpcReply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RaftMsg::InstallSnapshotRpc(req, tx)).is_err() {
            return RpcReply {
                term: 0,
                success: false,
            };
        }
        rx.await.unwrap_or(RpcReply {
            term: 0,
            success: false,
        })
    }

    pub fn shutdown(&self) {
        self.join.abort();
    }
}

struct RaftActor<C, R, L, N, SM> {
    id: u64,
    role: Role,
    current_term: u64,
    voted_for: Option<u64>,
    commit_index: u64,
    last_applied: u64,
    leader_hint_tx: watch::Sender<Option<u64>>,
    metrics_tx: watch::Sender<RaftMetrics>,
    log: L,
    peers: HashMap<u64, RemotePeer<C>>,
    state_machine: SM,
    network_factory: Arc<N>,
    options: RaftOptions,
    pending_snapshot: Option<(u64, u64)>,
    pending_snapshot_bytes: Option<Vec<u8>>,
    votes_received: HashSet<u64>,
    election_epoch: u64,
    heartbeat_epoch: u64,
    rx_api: mpsc::UnboundedReceiver<RaftMsg<C, R>>,
    tx_api: mpsc::UnboundedSender<RaftMsg<C, R>>,
}

/// Spawns a Raft actor reactor task (spec §4.6; SPEC_FULL §2.6). `peers`
/// are the other cluster members' ids and Raft-service names (resolved
/// through the locator by the network factory).
pub fn spawn<C, R, L, N, SM>(
    id: u64,
    peers: Vec<(u64, String)>,
    log: L,
    state_machine: SM,
    network_factory: Arc<N>,
    options: RaftOptions,
) -> RaftHandle<C, R>
where
    C: Clone + Send + Sync + 'static,
    R: Send + 'static,
    L: Log<C, R> + Send + 'static,
    N: NetworkFactory<C> + 'static,
    SM: StateMachine<Command = C, Response = R> + Send + 'static,
{
    let (tx_api, rx_api) = mpsc::unbounded_channel();
    let (leader_hint_tx, leader_hint_rx) = watch::channel(None);
    let (metrics_tx, metrics_rx) = metrics::channel(id);

    let mut peer_map = HashMap::new();
    for (peer_id, name) in peers {
        peer_map.insert(peer_id, RemotePeer::new(peer_id, name));
    }

    let mut actor = RaftActor {
        id,
        role: Role::Follower,
        current_term: 0,
        voted_for: None,
        commit_index: 0,
        last_applied: 0,
        leader_hint_tx,
        metrics_tx,
        log,
        peers: peer_map,
        state_machine,
        network_factory,
        options,
        pending_snapshot: None,
        pending_snapshot_bytes: None,
        votes_received: HashSet::new(),
        election_epoch: 0,
        heartbeat_epoch: 0,
        rx_api,
        tx_api: tx_api.clone(),
    };
    actor.seed_log_if_empty();
    actor.publish_metrics();

    let join = tokio::spawn(async move {
        actor.restart_election_timer();
        while let Some(msg) = actor.rx_api.recv().await {
            actor.handle_msg(msg).await;
        }
    });

    RaftHandle {
        tx: tx_api,
        leader_hint_rx,
        metrics_rx,
        join: Arc::new(join),
    }
}

impl<C, R, L, N, SM> RaftActor<C, R, L, N, SM>
where
    C: Clone + Send + Sync + 'static,
    R: Send + 'static,
    L: Log<C, R>,
    N: NetworkFactory<C> + 'static,
    SM: StateMachine<Command = C, Response = R>,
{
    /// On construction, if the supplied log is empty, seed it with a
    /// committed baseline at index/term 0 (SPEC_FULL §2.6), avoiding
    /// special-casing index 0 through the rest of the algorithm.
    fn seed_log_if_empty(&mut self) {
        if self.log.last_index() == 0 && self.log.snapshot_index() == 0 {
            let snapshot = self.state_machine.snapshot();
            self.log.set_snapshot(0, 0, snapshot);
        }
    }

    fn publish_metrics(&self) {
        let _ = self.metrics_tx.send(RaftMetrics {
            id: self.id,
            state: self.role,
            current_term: self.current_term,
            last_log_index: self.log.last_index(),
            last_applied: self.last_applied,
            leader_id: *self.leader_hint_tx.borrow(),
        });
    }

    fn set_leader_hint(&self, leader: Option<u64>) {
        let _ = self.leader_hint_tx.send(leader);
    }

    fn random_election_timeout(&self) -> Duration {
        let base = self.options.election_timeout;
        let lo = base.as_millis() as u64;
        let hi = (base * 2).as_millis() as u64;
        let millis = rand::thread_rng().gen_range(lo..=hi.max(lo));
        Duration::from_millis(millis)
    }

    fn restart_election_timer(&mut self) {
        self.election_epoch += 1;
        let epoch = self.election_epoch;
        let dur = self.random_election_timeout();
        let tx = self.tx_api.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dur).await;
            let _ = tx.send(RaftMsg::ElectionTimeout(epoch));
        });
    }

    fn start_heartbeats(&mut self) {
        self.heartbeat_epoch += 1;
        let epoch = self.heartbeat_epoch;
        let period = self.options.heartbeat_timeout;
        let tx = self.tx_api.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if tx.send(RaftMsg::HeartbeatTick(epoch)).is_err() {
                    break;
                }
            }
        });
    }

    fn stop_heartbeats(&mut self) {
        self.heartbeat_epoch += 1;
    }

    async fn handle_msg(&mut self, msg: RaftMsg<C, R>) {
        match msg {
            RaftMsg::AppendEntriesRpc(req, tx) => {
                let reply = self.handle_append_entries(req);
                let _ = tx.send(reply);
            }
            RaftMsg::RequestVoteRpc(req, tx) => {
                let reply = self.handle_request_vote(req);
                let _ = tx.send(reply);
            }
            RaftMsg::InstallSnapshotRpc(req, tx) => {
                let reply = self.handle_install_snapshot(req);
                let _ = tx.send(reply);
            }
            RaftMsg::Call(command, tx) => self.handle_call(command, tx),
            RaftMsg::AppendReply {
                peer_id,
                sent_up_to,
                client,
                reply,
            } => self.handle_append_reply(peer_id, sent_up_to, client, reply),
            RaftMsg::InstallSnapshotReply {
                peer_id,
                snapshot_index,
                client,
                reply,
            } => self.handle_install_snapshot_reply(peer_id, snapshot_index, client, reply),
            RaftMsg::VoteReply {
                peer_id,
                term_sent,
                reply,
            } => self.handle_vote_reply(peer_id, term_sent, reply),
            RaftMsg::ConnectFailed { peer_id } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.in_flight_append = false;
                    let delay = peer.backoff.next_delay();
                    peer.next_connect_attempt = Some(Instant::now() + delay);
                }
            }
            RaftMsg::ElectionTimeout(epoch) => {
                if epoch == self.election_epoch && self.role != Role::Leader {
                    self.start_election();
                }
            }
            RaftMsg::HeartbeatTick(epoch) => {
                if epoch == self.heartbeat_epoch && self.role == Role::Leader {
                    self.trigger_replication_all();
                }
            }
        }
    }

    /// Observes a term from any RPC or reply; steps down to Follower if
    /// it is higher than ours (spec §4.6 role-transition table).
    fn observe_term(&mut self, term: u64) -> bool {
        if term > self.current_term {
            self.step_down(term);
            true
        } else {
            false
        }
    }

    fn step_down(&mut self, new_term: u64) {
        if new_term > self.current_term {
            self.current_term = new_term;
            self.voted_for = None;
        }
        let was_leader = self.role == Role::Leader;
        self.role = Role::Follower;
        self.set_leader_hint(None);
        if was_leader {
            self.stop_heartbeats();
            for index in (self.commit_index + 1)..=self.log.last_index() {
                self.log.with_entry_mut(index, |e| e.notify_err(RaftError::Unknown));
            }
        }
        self.restart_election_timer();
        self.publish_metrics();
    }

    fn start_election(&mut self) {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.votes_received = HashSet::new();
        self.votes_received.insert(self.id);
        self.restart_election_timer();

        let last_index = self.log.last_index();
        let last_term = self.log.last_term();
        let term = self.current_term;

        for peer_id in self.peers.keys().copied().collect::<Vec<_>>() {
            let (service_name, maybe_client) = {
                let peer = &self.peers[&peer_id];
                (peer.service_name.clone(), peer.client.clone())
            };
            let factory = self.network_factory.clone();
            let tx = self.tx_api.clone();
            let req = RequestVoteRequest {
                term,
                candidate_id: self.id,
                last_log_index: last_index,
                last_log_term: last_term,
            };
            tokio::spawn(async move {
                let client = match maybe_client {
                    Some(c) => c,
                    None => match factory.connect(&service_name).await {
                        Ok(c) => c,
                        Err(_) => {
                            let _ = tx.send(RaftMsg::ConnectFailed { peer_id });
                            return;
                        }
                    },
                };
                let reply = client.request_vote(req).await;
                let _ = tx.send(RaftMsg::VoteReply {
                    peer_id,
                    term_sent: term,
                    reply,
                });
            });
        }
        self.publish_metrics();
    }

    fn switch_to_leader(&mut self) {
        self.role = Role::Leader;
        self.set_leader_hint(Some(self.id));
        self.election_epoch += 1; // invalidate any pending election timer
        let last_index = self.log.last_index();
        for peer in self.peers.values_mut() {
            peer.reset_for_new_leadership(last_index);
        }
        // Nop entry enables commitment of prior-term entries (spec §4.6).
        self.log.push(LogEntry::nop(self.current_term));
        self.start_heartbeats();
        self.publish_metrics();
        self.trigger_replication_all();
    }

    fn handle_call(&mut self, command: C, tx: oneshot::Sender<Result<R, RaftError>>) {
        if self.role != Role::Leader {
            let _ = tx.send(Err(RaftError::NotLeader));
            return;
        }
        let mut entry = LogEntry::command(self.current_term, command);
        entry.bind(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        self.log.push(entry);
        self.trigger_replication_all();
        self.publish_metrics();
    }

    fn handle_request_vote(&mut self, req: RequestVoteRequest) -> RequestVoteReply {
        self.observe_term(req.term);
        if req.term < self.current_term {
            return RequestVoteReply {
                term: self.current_term,
                vote_granted: false,
            };
        }
        let last_index = self.log.last_index();
        let last_term = self.log.last_term();
        let candidate_up_to_date = req.last_log_term > last_term
            || (req.last_log_term == last_term && req.last_log_index >= last_index);
        let can_vote = self.voted_for.is_none() || self.voted_for == Some(req.candidate_id);
        let grant = can_vote && candidate_up_to_date;
        if grant {
            self.voted_for = Some(req.candidate_id);
            self.restart_election_timer();
            self.publish_metrics();
        }
        RequestVoteReply {
            term: self.current_term,
            vote_granted: grant,
        }
    }

    fn handle_append_entries(&mut self, req: AppendEntriesRequest<C>) -> RpcReply {
        self.observe_term(req.term);
        if req.term < self.current_term {
            return RpcReply {
                term: self.current_term,
                success: false,
            };
        }
        if self.role == Role::Candidate {
            self.role = Role::Follower;
        }
        self.set_leader_hint(Some(req.leader_id));
        self.restart_election_timer();

        let snapshot_index = self.log.snapshot_index();
        let snapshot_term = self.log.snapshot_term();
        let last_index = self.log.last_index();

        if req.prev_index < snapshot_index {
            let overlap = req.entries.iter().find(|e| e.index == snapshot_index);
            match overlap {
                Some(e) if e.term == snapshot_term => {}
                _ => {
                    tracing::error!(
                        "append_entries snapshot-prefix term mismatch at index {}",
                        snapshot_index
                    );
                    return RpcReply {
                        term: self.current_term,
                        success: false,
                    };
                }
            }
        } else if req.prev_index <= last_index {
            let local_prev_term = if req.prev_index == snapshot_index {
                Some(snapshot_term)
            } else {
                self.log.term_at(req.prev_index)
            };
            if local_prev_term != Some(req.prev_term) {
                return RpcReply {
                    term: self.current_term,
                    success: false,
                };
            }
        } else {
            return RpcReply {
                term: self.current_term,
                success: false,
            };
        }

        for e in req.entries.into_iter().filter(|e| e.index > snapshot_index) {
            let existing_term = self.log.term_at(e.index);
            match existing_term {
                Some(t) if t == e.term => continue,
                Some(_) => {
                    let removed = self.log.truncate(e.index);
                    for mut stale in removed {
                        stale.notify_err(RaftError::Unknown);
                    }
                    self.log.push(LogEntry::from_value(e.term, e.value));
                }
                None => {
                    self.log.push(LogEntry::from_value(e.term, e.value));
                }
            }
        }

        self.commit_index = req.leader_commit.min(self.log.last_index());
        self.drive_applier();

        RpcReply {
            term: self.current_term,
            success: true,
        }
    }

    fn handle_install_snapshot(&mut self, req: InstallSnapshotRequest) -> RpcReply {
        self.observe_term(req.term);
        if req.term < self.current_term {
            return RpcReply {
                term: self.current_term,
                success: false,
            };
        }
        if self.role == Role::Candidate {
            self.role = Role::Follower;
        }
        self.set_leader_hint(Some(req.leader_id));
        self.restart_election_timer();

        self.state_machine.restore(&req.snapshot);
        self.log
            .set_snapshot(req.snapshot_index, req.snapshot_term, req.snapshot);
        self.last_applied = self.last_applied.max(req.snapshot_index);
        self.commit_index = self.commit_index.max(req.snapshot_index);
        self.publish_metrics();

        RpcReply {
            term: self.current_term,
            success: true,
        }
    }

    fn handle_vote_reply(
        &mut self,
        peer_id: u64,
        term_sent: u64,
        reply: anyhow::Result<RequestVoteReply>,
    ) {
        if self.role != Role::Candidate || term_sent != self.current_term {
            return;
        }
        let reply = match reply {
            Ok(r) => r,
            Err(_) => return,
        };
        if self.observe_term(reply.term) {
            return;
        }
        if reply.vote_granted {
            self.votes_received.insert(peer_id);
            let needed = (self.peers.len() + 1) / 2 + 1;
            if self.votes_received.len() >= needed {
                self.switch_to_leader();
            }
        }
    }

    fn handle_append_reply(
        &mut self,
        peer_id: u64,
        sent_up_to: u64,
        client: Option<Arc<dyn RaftNetwork<C>>>,
        reply: anyhow::Result<RpcReply>,
    ) {
        match reply {
            Ok(r) => {
                if self.observe_term(r.term) {
                    return;
                }
                if self.role != Role::Leader {
                    return;
                }
                let message_size = self.options.message_size as u64;
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.client = client;
                    peer.backoff.reset();
                    peer.next_connect_attempt = None;
                    if r.success {
                        peer.note_append_success(sent_up_to);
                    } else {
                        peer.note_append_rejected(message_size);
                    }
                }
                if r.success {
                    self.recompute_commit_index();
                    self.drive_applier();
                }
                self.trigger_replication_for(peer_id);
            }
            Err(_) => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.drop_client();
                    peer.in_flight_append = false;
                }
            }
        }
    }

    fn handle_install_snapshot_reply(
        &mut self,
        peer_id: u64,
        snapshot_index: u64,
        client: Option<Arc<dyn RaftNetwork<C>>>,
        reply: anyhow::Result<RpcReply>,
    ) {
        match reply {
            Ok(r) => {
                if self.observe_term(r.term) {
                    return;
                }
                if self.role != Role::Leader {
                    return;
                }
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.client = client;
                    peer.backoff.reset();
                    peer.next_connect_attempt = None;
                    peer.in_flight_append = false;
                    if r.success {
                        peer.next_index = snapshot_index + 1;
                        peer.match_index = peer.match_index.max(snapshot_index);
                    }
                }
                if r.success {
                    self.recompute_commit_index();
                }
                self.trigger_replication_for(peer_id);
            }
            Err(_) => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.drop_client();
                    peer.in_flight_append = false;
                }
            }
        }
    }

    /// Commit rule (spec §4.6): median of all peers' `match_index`
    /// (including the leader's own `last_index`), committed only if that
    /// index belongs to the current term.
    fn recompute_commit_index(&mut self) {
        let mut indices: Vec<u64> = self.peers.values().map(|p| p.match_index).collect();
        indices.push(self.log.last_index());
        indices.sort_unstable();
        let median = indices[indices.len() / 2];
        if median <= self.commit_index {
            return;
        }
        let term_at_median = if median == self.log.snapshot_index() {
            Some(self.log.snapshot_term())
        } else {
            self.log.term_at(median)
        };
        if term_at_median == Some(self.current_term) {
            self.commit_index = median;
        }
    }

    /// Applier (spec §4.6): while `last_applied < commit_index`, applies
    /// entries in batches of at most `message_size`. If the state machine
    /// raises on an entry, `last_applied` stops just before it and the
    /// whole applier run is abandoned for this call; the next call (triggered
    /// by the next commit advance) re-applies from the same entry.
    fn drive_applier(&mut self) {
        'outer: loop {
            if self.last_applied >= self.commit_index {
                break;
            }
            if self.log.snapshot_index() > self.last_applied {
                let snapshot = self.log.snapshot();
                self.state_machine.restore(&snapshot);
                self.last_applied = self.log.snapshot_index();
                continue;
            }
            let batch_end = self
                .commit_index
                .min(self.last_applied + self.options.message_size as u64);
            let count = (batch_end - self.last_applied) as usize;
            let batch = self.log.entries_from(self.last_applied, count);
            if batch.is_empty() {
                break;
            }
            for entry in &batch {
                match &entry.value {
                    EntryValue::Command(command) => match self.state_machine.apply(command) {
                        Ok(result) => {
                            let index = entry.index;
                            self.log.with_entry_mut(index, move |e| e.notify_ok(result));
                            self.last_applied = index;
                        }
                        Err(err) => {
                            tracing::warn!(
                                index = entry.index,
                                error = %err,
                                "state machine apply failed, will retry"
                            );
                            break 'outer;
                        }
                    },
                    EntryValue::Nop => {
                        self.last_applied = entry.index;
                    }
                }
            }
            self.maybe_manage_snapshot();
        }
        self.publish_metrics();
    }

    /// Every `snapshot_threshold` applied commands past the existing
    /// snapshot, request a fresh snapshot; install it once the log has
    /// grown `snapshot_threshold/2` beyond it (spec §4.6).
    fn maybe_manage_snapshot(&mut self) {
        if self.pending_snapshot.is_none()
            && self.last_applied >= self.log.snapshot_index() + self.options.snapshot_threshold
        {
            let term = self
                .log
                .term_at(self.last_applied)
                .unwrap_or(self.current_term);
            self.pending_snapshot = Some((self.last_applied, term));
            self.pending_snapshot_bytes = Some(self.state_machine.snapshot());
        }
        if let Some((snap_index, snap_term)) = self.pending_snapshot {
            if self.log.last_index() >= snap_index + self.options.snapshot_threshold / 2 {
                if let Some(bytes) = self.pending_snapshot_bytes.take() {
                    self.log.set_snapshot(snap_index, snap_term, bytes);
                }
                self.pending_snapshot = None;
            }
        }
    }

    fn trigger_replication_all(&mut self) {
        for peer_id in self.peers.keys().copied().collect::<Vec<_>>() {
            self.trigger_replication_for(peer_id);
        }
    }

    /// Leader side per peer (spec §4.6): send `InstallSnapshot` if
    /// `next_index <= snapshot_index`, else `AppendEntries` with up to
    /// `message_size` entries. Connection establishment and the RPC
    /// itself run in a spawned task; all bookkeeping mutation happens
    /// back on the reactor when the reply arrives (spec §5).
    fn trigger_replication_for(&mut self, peer_id: u64) {
        if self.role != Role::Leader {
            return;
        }
        let (service_name, maybe_client, next_index, in_flight, backing_off) = {
            let peer = match self.peers.get(&peer_id) {
                Some(p) => p,
                None => return,
            };
            let backing_off = peer
                .next_connect_attempt
                .map(|t| Instant::now() < t)
                .unwrap_or(false);
            (
                peer.service_name.clone(),
                peer.client.clone(),
                peer.next_index,
                peer.in_flight_append,
                backing_off,
            )
        };
        if in_flight || backing_off {
            return;
        }

        let snapshot_index = self.log.snapshot_index();
        let snapshot_term = self.log.snapshot_term();
        let factory = self.network_factory.clone();
        let tx = self.tx_api.clone();

        if next_index <= snapshot_index {
            let req = InstallSnapshotRequest {
                term: self.current_term,
                leader_id: self.id,
                snapshot_index,
                snapshot_term,
                snapshot: self.log.snapshot(),
                leader_commit: self.commit_index,
            };
            if let Some(peer) = self.peers.get_mut(&peer_id) {
                peer.in_flight_append = true;
            }
            tokio::spawn(async move {
                let client = match maybe_client {
                    Some(c) => c,
                    None => match factory.connect(&service_name).await {
                        Ok(c) => c,
                        Err(_) => {
                            let _ = tx.send(RaftMsg::ConnectFailed { peer_id });
                            return;
                        }
                    },
                };
                let reply = client.install_snapshot(req).await;
                let _ = tx.send(RaftMsg::InstallSnapshotReply {
                    peer_id,
                    snapshot_index,
                    client: Some(client),
                    reply,
                });
            });
        } else {
            let prev_index = next_index - 1;
            let prev_term = if prev_index == 0 {
                0
            } else if prev_index == snapshot_index {
                snapshot_term
            } else {
                self.log.term_at(prev_index).unwrap_or(0)
            };
            let entries = self.log.entries_from(prev_index, self.options.message_size);
            let last_sent_index = entries.last().map(|e| e.index).unwrap_or(prev_index);
            let req = AppendEntriesRequest {
                term: self.current_term,
                leader_id: self.id,
                prev_index,
                prev_term,
                entries,
                leader_commit: self.commit_index,
            };
            if let Some(peer) = self.peers.get_mut(&peer_id) {
                peer.in_flight_append = true;
            }
            tokio::spawn(async move {
                let client = match maybe_client {
                    Some(c) => c,
                    None => match factory.connect(&service_name).await {
                        Ok(c) => c,
                        Err(_) => {
                            let _ = tx.send(RaftMsg::ConnectFailed { peer_id });
                            return;
                        }
                    },
                };
                let reply = client.append_entries(req).await;
                let _ = tx.send(RaftMsg::AppendReply {
                    peer_id,
                    sent_up_to: last_sent_index,
                    client: Some(client),
                    reply,
                });
            });
        }
    }
}
