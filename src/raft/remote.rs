//! Outbound RPC endpoint used by the Raft actor to reach a cluster peer
//! (spec §3 "Remote peer", §4.7).
//!
//! Grounded in `examples/original_source/include/cocaine/detail/raft/remote.hpp`:
//! `next_index`/`match_index` bookkeeping, lazy connection establishment
//! via a locator resolve + connect, and "no retry loop inside the peer
//! client — the next leader tick retries" (spec §5). SPEC_FULL §2.7 adds
//! exponential backoff on top of that bare retry-on-next-tick, per the
//! Open Question in spec §9 recommending it as a safe addition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

use super::log::ReplicatedEntry;

/// `(term, success)` reply shared by append-entries and install-snapshot
/// RPCs (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcReply {
    pub term: u64,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesRequest<C> {
    pub term: u64,
    pub leader_id: u64,
    pub prev_index: u64,
    pub prev_term: u64,
    pub entries: Vec<ReplicatedEntry<C>>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: u64,
    pub snapshot_index: u64,
    pub snapshot_term: u64,
    pub snapshot: Vec<u8>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

/// The outbound transport a remote peer client issues RPCs over. A real
/// implementation wraps a `Session`'s upstream to the peer's Raft
/// dispatch; tests use an in-memory fake.
#[async_trait]
pub trait RaftNetwork<C>: Send + Sync {
    async fn append_entries(
        &self,
        req: AppendEntriesRequest<C>,
    ) -> anyhow::Result<RpcReply>;

    async fn install_snapshot(
        &self,
        req: InstallSnapshotRequest,
    ) -> anyhow::Result<RpcReply>;

    async fn request_vote(
        &self,
        req: RequestVoteRequest,
    ) -> anyhow::Result<RequestVoteReply>;
}

/// Resolves and connects to a peer's Raft network endpoint, named rather
/// than addressed directly so peers can move (spec §4.7, §6 "Locator
/// dispatch").
#[async_trait]
pub trait NetworkFactory<C>: Send + Sync {
    async fn connect(&self, peer_service_name: &str) -> anyhow::Result<Arc<dyn RaftNetwork<C>>>;
}

/// Capped, jittered exponential backoff for peer reconnect attempts
/// (SPEC_FULL §2.7).
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Duration to wait before the next attempt, advancing the internal
    /// attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt += 1;
        let max_delay = self.base.saturating_mul(1u32 << exp).min(self.cap);
        let jittered_millis = rand::thread_rng().gen_range(0..=max_delay.as_millis().max(1) as u64);
        Duration::from_millis(jittered_millis)
    }

    /// Resets the backoff after a successful RPC (SPEC_FULL §2.7).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_millis(50), Duration::from_secs(10))
    }
}

/// Per-peer follower-tracking record held by a leader (spec §3 "Remote
/// peer"). `next_index`/`match_index` reset on leadership loss.
pub struct RemotePeer<C> {
    pub id: u64,
    pub service_name: String,
    pub next_index: u64,
    pub match_index: u64,
    pub client: Option<Arc<dyn RaftNetwork<C>>>,
    pub backoff: Backoff,
    pub in_flight_append: bool,
    pub next_connect_attempt: Option<Instant>,
    pub last_heartbeat_sent: Option<Instant>,
}

impl<C> RemotePeer<C> {
    pub fn new(id: u64, service_name: impl Into<String>) -> Self {
        RemotePeer {
            id,
            service_name: service_name.into(),
            next_index: 1,
            match_index: 0,
            client: None,
            backoff: Backoff::default(),
            in_flight_append: false,
            next_connect_attempt: None,
            last_heartbeat_sent: None,
        }
    }

    /// Resets all leader-local tracking for this peer (spec §4.6 "Candidate
    /// -> Leader: reset all peers' next_index, match_index").
    pub fn reset_for_new_leadership(&mut self, last_index: u64) {
        self.next_index = last_index + 1;
        self.match_index = 0;
        self.in_flight_append = false;
    }

    /// Drops the cached client on transport error; it will be re-resolved
    /// on the next replication attempt (spec §4.7).
    pub fn drop_client(&mut self) {
        self.client = None;
    }

    /// Applies a successful append-entries/install-snapshot reply (spec
    /// §4.6 "On success reply").
    pub fn note_append_success(&mut self, last_sent_index: u64) {
        self.match_index = self.match_index.max(last_sent_index);
        self.next_index = self.next_index.max(last_sent_index + 1);
        self.in_flight_append = false;
    }

    /// Applies a rejection that did not carry a higher term (spec §4.6
    /// "On rejection without higher term").
    pub fn note_append_rejected(&mut self, message_size: u64) {
        let back_off = message_size.min(self.next_index.saturating_sub(1));
        self.next_index = (self.next_index - back_off).max(1);
        self.in_flight_append = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_millis(100));
        for _ in 0..20 {
            let d = b.next_delay();
            assert!(d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn backoff_reset_restarts_from_base() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_secs(10));
        for _ in 0..5 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.attempt, 0);
    }

    #[test]
    fn reset_for_new_leadership_resets_next_and_match_index() {
        let mut peer: RemotePeer<()> = RemotePeer::new(2, "peer-2");
        peer.next_index = 1;
        peer.match_index = 40;
        peer.in_flight_append = true;
        peer.reset_for_new_leadership(50);
        assert_eq!(peer.next_index, 51);
        assert_eq!(peer.match_index, 0);
        assert!(!peer.in_flight_append);
    }

    #[test]
    fn note_append_success_advances_match_and_next_index() {
        let mut peer: RemotePeer<()> = RemotePeer::new(2, "peer-2");
        peer.note_append_success(10);
        assert_eq!(peer.match_index, 10);
        assert_eq!(peer.next_index, 11);
        // A later, smaller ack (reordered reply) never moves indices backward.
        peer.note_append_success(5);
        assert_eq!(peer.match_index, 10);
        assert_eq!(peer.next_index, 11);
    }

    #[test]
    fn note_append_rejected_backs_off_by_message_size_but_not_below_one() {
        let mut peer: RemotePeer<()> = RemotePeer::new(2, "peer-2");
        peer.next_index = 5;
        peer.note_append_rejected(10);
        assert_eq!(peer.next_index, 1);

        peer.next_index = 20;
        peer.note_append_rejected(3);
        assert_eq!(peer.next_index, 17);
    }

    #[test]
    fn drop_client_clears_cached_client() {
        let mut peer: RemotePeer<()> = RemotePeer::new(1, "peer-1");
        peer.in_flight_append = true;
        peer.drop_client();
        assert!(peer.client.is_none());
    }
}
