//! Raft actor configuration (ambient, not named as its own module in the
//! spec, but referenced throughout spec §4.6/§5 as named knobs).
//! Mirrors the teacher's `crate::config::Config`, referenced pervasively
//! in `core/mod.rs` as e.g. `self.config.election_timeout_min`.

use std::time::Duration;

/// Tunables for one Raft actor (spec §4.6, §5).
#[derive(Debug, Clone)]
pub struct RaftOptions {
    /// Lower bound of the randomized election timeout (spec §4.6:
    /// "drawn uniformly from `[election_timeout, 2*election_timeout]`").
    pub election_timeout: Duration,
    /// Interval between leader heartbeats (spec §4.6 "Heartbeats").
    pub heartbeat_timeout: Duration,
    /// Maximum entries per `AppendEntries` batch / applier tick (spec
    /// §4.6, §5 "Resource budgets").
    pub message_size: usize,
    /// Applied-commands interval at which a fresh snapshot is requested
    /// (spec §4.6 "Applier").
    pub snapshot_threshold: u64,
}

impl Default for RaftOptions {
    fn default() -> Self {
        RaftOptions {
            election_timeout: Duration::from_millis(150),
            heartbeat_timeout: Duration::from_millis(50),
            message_size: 100,
            snapshot_threshold: 1000,
        }
    }
}

impl RaftOptions {
    pub fn builder() -> RaftOptionsBuilder {
        RaftOptionsBuilder(RaftOptions::default())
    }
}

/// Builder for `RaftOptions`, following the same "reasonable defaults,
/// override what you need" shape as the teacher's config builder.
pub struct RaftOptionsBuilder(RaftOptions);

impl RaftOptionsBuilder {
    pub fn election_timeout(mut self, d: Duration) -> Self {
        self.0.election_timeout = d;
        self
    }

    pub fn heartbeat_timeout(mut self, d: Duration) -> Self {
        self.0.heartbeat_timeout = d;
        self
    }

    pub fn message_size(mut self, n: usize) -> Self {
        self.0.message_size = n;
        self
    }

    pub fn snapshot_threshold(mut self, n: u64) -> Self {
        self.0.snapshot_threshold = n;
        self
    }

    pub fn build(self) -> RaftOptions {
        self.0
    }
}
