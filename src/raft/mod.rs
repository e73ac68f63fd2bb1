//! Single-partition Raft consensus actor (spec §3 "Raft core", §4.6).
//!
//! Grounded in `examples/original_source/include/cocaine/detail/raft/actor.hpp`
//! for the algorithm and the teacher's `async-raft` crate
//! (`examples/simon-fu-async-raft/async-raft/src/`) for the module split:
//! a `Raft` handle wrapping a spawned reactor, a pluggable storage trait,
//! per-peer replication state, and a `watch`-published metrics snapshot.

mod actor;
mod config;
mod entry;
mod log;
mod metrics;
mod remote;

pub use actor::{spawn, Role, RaftHandle};
pub use config::{RaftOptions, RaftOptionsBuilder};
pub use entry::{EntryValue, LogEntry};
pub use log::{Log, ReplicatedEntry, StateMachine};
pub use metrics::RaftMetrics;
pub use remote::{
    AppendEntriesRequest, Backoff, InstallSnapshotRequest, NetworkFactory, RaftNetwork,
    RemotePeer, RequestVoteReply, RequestVoteRequest, RpcReply,
};
