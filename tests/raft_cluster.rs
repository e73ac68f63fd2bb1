//! End-to-end Raft actor tests against an in-process cluster, wiring
//! `RaftHandle`s to each other directly instead of over a real socket
//! (spec §8 "Raft safety"/"Raft liveness" and the 3-node happy-path
//! scenario). Mirrors the teacher's `tests/leader_metrics.rs`-style
//! placement, with a minimal in-process router standing in for the
//! teacher's `RaftRouter` fixture.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use chamber::error::RaftError;
use chamber::raft::{
    self, AppendEntriesRequest, InstallSnapshotRequest, NetworkFactory, RaftHandle, RaftNetwork,
    RaftOptions, RequestVoteReply, RequestVoteRequest, Role, RpcReply, StateMachine,
};
use chamber_memlog::{KvCommand, KvResponse, KvStateMachine, MemLog};

type Handle = RaftHandle<KvCommand, KvResponse>;

#[derive(Clone, Default)]
struct Registry(Arc<RwLock<HashMap<String, Handle>>>);

impl Registry {
    async fn insert(&self, name: String, handle: Handle) {
        self.0.write().await.insert(name, handle);
    }
}

struct LocalFactory(Registry);

#[async_trait]
impl NetworkFactory<KvCommand> for LocalFactory {
    async fn connect(&self, name: &str) -> anyhow::Result<Arc<dyn RaftNetwork<KvCommand>>> {
        let guard = self.0 .0.read().await;
        let handle = guard
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown peer {}", name))?;
        Ok(Arc::new(LocalClient(handle)))
    }
}

struct LocalClient(Handle);

#[async_trait]
impl RaftNetwork<KvCommand> for LocalClient {
    async fn append_entries(
        &self,
        req: AppendEntriesRequest<KvCommand>,
    ) -> anyhow::Result<RpcReply> {
        Ok(self.0.append_entries(req).await)
    }

    async fn install_snapshot(&self, req: InstallSnapshotRequest) -> anyhow::Result<RpcReply> {
        Ok(self.0.install_snapshot(req).await)
    }

    async fn request_vote(&self, req: RequestVoteRequest) -> anyhow::Result<RequestVoteReply> {
        Ok(self.0.request_vote(req).await)
    }
}

fn node_name(id: u64) -> String {
    format!("node-{}", id)
}

fn fast_options() -> RaftOptions {
    RaftOptions::builder()
        .election_timeout(Duration::from_millis(60))
        .heartbeat_timeout(Duration::from_millis(20))
        .message_size(50)
        .snapshot_threshold(1000)
        .build()
}

async fn spawn_cluster(n: u64, registry: &Registry) -> Vec<Handle> {
    let mut handles = Vec::new();
    for id in 0..n {
        let peers: Vec<(u64, String)> = (0..n)
            .filter(|&p| p != id)
            .map(|p| (p, node_name(p)))
            .collect();
        let log: MemLog<KvCommand, KvResponse> = MemLog::new();
        let state_machine = KvStateMachine::new();
        let factory = Arc::new(LocalFactory(registry.clone()));
        let handle = raft::spawn(id, peers, log, state_machine, factory, fast_options());
        registry.insert(node_name(id), handle.clone()).await;
        handles.push(handle);
    }
    handles
}

async fn wait_for_leader(handles: &[Handle], timeout: Duration) -> Option<usize> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        for (i, h) in handles.iter().enumerate() {
            if h.metrics().borrow().state == Role::Leader {
                return Some(i);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn elects_a_single_leader() {
    let registry = Registry::default();
    let handles = spawn_cluster(3, &registry).await;

    let leader = wait_for_leader(&handles, Duration::from_secs(2)).await;
    assert!(leader.is_some(), "expected a leader to emerge");

    // No two nodes should report themselves as Leader at once: every other
    // node either sees the same leader id or doesn't yet have one.
    let leader_idx = leader.unwrap();
    let leader_id = handles[leader_idx].metrics().borrow().id;
    for (i, h) in handles.iter().enumerate() {
        if i == leader_idx {
            continue;
        }
        assert_ne!(h.metrics().borrow().state, Role::Leader, "node {} also claims leadership", i);
        let hint = h.leader_hint();
        if let Some(hinted) = hint {
            assert_eq!(hinted, leader_id);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_call_replicates_and_applies_on_all_nodes() {
    let registry = Registry::default();
    let handles = spawn_cluster(3, &registry).await;

    let leader_idx = wait_for_leader(&handles, Duration::from_secs(2))
        .await
        .expect("a leader should emerge");
    let leader = &handles[leader_idx];

    let response = leader
        .call(KvCommand::Set {
            key: "x".into(),
            value: "1".into(),
        })
        .await
        .expect("leader should accept the command");
    assert_eq!(response, KvResponse::Set);

    // The leader's Nop (index 1) plus this Set (index 2) must reach every
    // node's state machine.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let applied: Vec<u64> = handles
            .iter()
            .map(|h| h.metrics().borrow().last_applied)
            .collect();
        if applied.iter().all(|&a| a >= 2) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replication did not converge, last_applied = {:?}",
            applied
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_leader_rejects_client_calls() {
    let registry = Registry::default();
    let handles = spawn_cluster(3, &registry).await;

    let leader_idx = wait_for_leader(&handles, Duration::from_secs(2))
        .await
        .expect("a leader should emerge");
    let follower_idx = (0..handles.len()).find(|&i| i != leader_idx).unwrap();

    let result = handles[follower_idx]
        .call(KvCommand::Set {
            key: "y".into(),
            value: "2".into(),
        })
        .await;
    assert!(matches!(result, Err(RaftError::NotLeader)));
}

/// A state machine that fails to apply exactly its first command, then
/// delegates to an ordinary [`KvStateMachine`]. Used to exercise the
/// applier's "stop and retry later" contract (spec §4.6).
struct FlakyStateMachine {
    inner: KvStateMachine,
    still_failing: AtomicBool,
}

impl FlakyStateMachine {
    fn new() -> Self {
        FlakyStateMachine {
            inner: KvStateMachine::new(),
            still_failing: AtomicBool::new(true),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("state machine temporarily unavailable")]
struct FlakyError;

impl StateMachine for FlakyStateMachine {
    type Command = KvCommand;
    type Response = KvResponse;
    type Error = FlakyError;

    fn apply(&mut self, command: &KvCommand) -> Result<KvResponse, FlakyError> {
        if self.still_failing.swap(false, Ordering::SeqCst) {
            return Err(FlakyError);
        }
        Ok(self.inner.apply(command).unwrap())
    }

    fn snapshot(&mut self) -> Vec<u8> {
        self.inner.snapshot()
    }

    fn restore(&mut self, snapshot: &[u8]) {
        self.inner.restore(snapshot)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn state_machine_apply_error_is_retried_not_skipped() {
    let registry = Registry::default();
    let mut handles = Vec::new();
    for id in 0..3u64 {
        let peers: Vec<(u64, String)> = (0..3)
            .filter(|&p| p != id)
            .map(|p| (p, node_name(p)))
            .collect();
        let log: MemLog<KvCommand, KvResponse> = MemLog::new();
        let factory = Arc::new(LocalFactory(registry.clone()));
        let handle = raft::spawn(id, peers, log, FlakyStateMachine::new(), factory, fast_options());
        registry.insert(node_name(id), handle.clone()).await;
        handles.push(handle);
    }

    let leader_idx = wait_for_leader(&handles, Duration::from_secs(2))
        .await
        .expect("a leader should emerge");
    let leader = &handles[leader_idx];

    // Every node's state machine fails to apply exactly once; the call must
    // still complete once the applier retries, not be lost.
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        leader.call(KvCommand::Set {
            key: "x".into(),
            value: "1".into(),
        }),
    )
    .await
    .expect("applier should retry past a failed apply instead of hanging")
    .expect("leader should accept the command");
    assert_eq!(response, KvResponse::Set);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let applied: Vec<u64> = handles
            .iter()
            .map(|h| h.metrics().borrow().last_applied)
            .collect();
        if applied.iter().all(|&a| a >= 2) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "apply retry never converged on every node, last_applied = {:?}",
            applied
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_term_leader_steps_down_and_unblocks_pending_calls() {
    let registry = Registry::default();
    let handles = spawn_cluster(3, &registry).await;

    let leader_idx = wait_for_leader(&handles, Duration::from_secs(2))
        .await
        .expect("a leader should emerge");
    let leader = handles[leader_idx].clone();

    // Stop every follower so the leader's next command can never reach a
    // majority and commit on its own.
    for (i, h) in handles.iter().enumerate() {
        if i != leader_idx {
            h.shutdown();
        }
    }

    let pending = tokio::spawn({
        let leader = leader.clone();
        async move {
            leader
                .call(KvCommand::Set {
                    key: "z".into(),
                    value: "stuck".into(),
                })
                .await
        }
    });

    // Give the leader's reactor a moment to process the call and push the
    // entry before the stale-term append-entries below arrives.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let higher_term = leader.metrics().borrow().current_term + 5;
    let reply = leader
        .append_entries(AppendEntriesRequest {
            term: higher_term,
            leader_id: 999,
            prev_index: 0,
            prev_term: 0,
            entries: Vec::new(),
            leader_commit: 0,
        })
        .await;
    assert!(reply.success);
    assert_eq!(reply.term, higher_term);

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("leader reactor should resolve the pending call promptly")
        .expect("call task should not panic");
    assert!(
        matches!(result, Err(RaftError::Unknown)),
        "uncommitted entry should be notified with Unknown on step-down, got {:?}",
        result
    );

    assert_ne!(
        leader.metrics().borrow().state,
        Role::Leader,
        "a higher term in an append-entries RPC must make the stale leader step down"
    );
}

fn snapshot_test_options() -> RaftOptions {
    RaftOptions::builder()
        .election_timeout(Duration::from_millis(60))
        .heartbeat_timeout(Duration::from_millis(20))
        .message_size(50)
        .snapshot_threshold(4)
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lagging_follower_catches_up_via_snapshot_install() {
    let registry = Registry::default();
    let options = snapshot_test_options();

    let mut handles = Vec::new();
    for id in 0..3u64 {
        let peers: Vec<(u64, String)> = (0..3)
            .filter(|&p| p != id)
            .map(|p| (p, node_name(p)))
            .collect();
        let log: MemLog<KvCommand, KvResponse> = MemLog::new();
        let state_machine = KvStateMachine::new();
        let factory = Arc::new(LocalFactory(registry.clone()));
        let handle = raft::spawn(id, peers, log, state_machine, factory, options.clone());
        handles.push(handle);
    }
    // Node 2 is deliberately left unregistered: it is running, but no peer
    // can resolve a connection to it, so it never receives any replication
    // while nodes 0 and 1 elect a leader and advance past a snapshot.
    registry.insert(node_name(0), handles[0].clone()).await;
    registry.insert(node_name(1), handles[1].clone()).await;

    let leader_idx = wait_for_leader(&handles[..2], Duration::from_secs(2))
        .await
        .expect("nodes 0 and 1 alone can still elect a leader");
    let leader = &handles[leader_idx];

    for n in 0..8 {
        leader
            .call(KvCommand::Set {
                key: "k".into(),
                value: n.to_string(),
            })
            .await
            .expect("command should be accepted");
    }

    let leader_caught_up = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if leader.metrics().borrow().last_applied >= 9 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < leader_caught_up,
            "leader did not apply its own commands"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let target = leader.metrics().borrow().last_applied;
    assert!(
        target >= options.snapshot_threshold,
        "expected enough commands to have formed a snapshot"
    );

    // Node 2 becomes reachable: with next_index stuck at 1 and the leader's
    // snapshot_index now past that, the leader's next replication attempt
    // for node 2 must take the InstallSnapshot branch rather than
    // AppendEntries (spec §4.6 "Leader side per peer").
    registry.insert(node_name(2), handles[2].clone()).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if handles[2].metrics().borrow().last_applied >= target {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "lagging follower never caught up via snapshot install, last_applied = {}",
            handles[2].metrics().borrow().last_applied
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequence_of_commands_is_applied_in_order_on_every_node() {
    let registry = Registry::default();
    let handles = spawn_cluster(3, &registry).await;

    let leader_idx = wait_for_leader(&handles, Duration::from_secs(2))
        .await
        .expect("a leader should emerge");
    let leader = &handles[leader_idx];

    for n in 0..5 {
        leader
            .call(KvCommand::Set {
                key: "counter".into(),
                value: n.to_string(),
            })
            .await
            .expect("command should be accepted");
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let applied: Vec<u64> = handles
            .iter()
            .map(|h| h.metrics().borrow().last_applied)
            .collect();
        if applied.iter().all(|&a| a >= 6) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "sequence did not fully replicate, last_applied = {:?}",
            applied
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
