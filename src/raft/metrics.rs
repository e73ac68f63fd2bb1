//! A minimal `RaftMetrics`-style snapshot published on a `watch` channel
//! after every role transition and commit advance (SPEC_FULL §2.9),
//! mirroring the teacher's `tx_metrics: watch::Sender<RaftMetrics>`.

use tokio::sync::watch;

use super::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftMetrics {
    pub id: u64,
    pub state: Role,
    pub current_term: u64,
    pub last_log_index: u64,
    pub last_applied: u64,
    pub leader_id: Option<u64>,
}

impl RaftMetrics {
    pub fn new(id: u64) -> Self {
        RaftMetrics {
            id,
            state: Role::Follower,
            current_term: 0,
            last_log_index: 0,
            last_applied: 0,
            leader_id: None,
        }
    }
}

pub fn channel(id: u64) -> (watch::Sender<RaftMetrics>, watch::Receiver<RaftMetrics>) {
    watch::channel(RaftMetrics::new(id))
}
