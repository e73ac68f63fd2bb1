//! The pluggable replicated log collaborator (spec §3 "Raft log", §6
//! "Persisted state": "kept in a pluggable `config.log` collaborator,
//! in-memory by default"). `chamber` only fixes the contract; the
//! in-memory reference implementation lives in the sibling
//! `chamber-memlog` crate, mirroring the teacher's `async-raft`
//! (`RaftStorage` trait) / `memstore` (in-memory implementor) split.

use super::entry::{EntryValue, LogEntry};

/// A strictly increasing, snapshot-prefixed sequence of entries (spec §3).
///
/// Implementors must uphold:
/// - `snapshot_index <= last_applied <= commit_index <= last_index` is the
///   actor's responsibility to maintain; the log itself only needs to keep
///   `snapshot_index <= last_index`.
/// - `push` assigns the next index after `last_index`.
/// - `truncate(index)` drops every entry `>= index` and returns them, so
///   the caller can notify their bound continuations with an error.
/// - `set_snapshot(i, t, s)` drops every entry `<= i` and installs `(i, t,
///   s)` as the new snapshot prefix.
///
/// Only `Send` is required, not `Sync`: a log is owned exclusively by the
/// Raft actor that mutates it and is never shared by reference across
/// threads, and its entries may carry a non-`Sync` boxed continuation.
pub trait Log<C: Clone, R>: Send {
    fn snapshot_index(&self) -> u64;
    fn snapshot_term(&self) -> u64;
    fn snapshot(&self) -> Vec<u8>;

    fn last_index(&self) -> u64;
    fn last_term(&self) -> u64;

    /// The term of the entry at `index`, if it's covered by this log
    /// (either in the snapshot prefix when `index == snapshot_index`, or
    /// among the random-accessible entries).
    fn term_at(&self, index: u64) -> Option<u64>;

    /// Appends `entry`, returning the index it was assigned
    /// (`last_index()` after the call).
    fn push(&mut self, entry: LogEntry<C, R>) -> u64;

    /// Drops every entry at index `>= index`, returning them in ascending
    /// index order.
    fn truncate(&mut self, index: u64) -> Vec<LogEntry<C, R>>;

    /// Installs a new snapshot prefix, dropping every entry `<= index`.
    fn set_snapshot(&mut self, index: u64, term: u64, snapshot: Vec<u8>);

    /// Entries strictly after `snapshot_index`, starting at `from`, in
    /// batches of at most `max_count` (spec §4.6 "Applier"/"Leader side
    /// per peer"). Returned by value since they are about to be sent over
    /// the wire (replication) or applied (state machine), both of which
    /// need owned copies regardless.
    fn entries_from(&self, from: u64, max_count: usize) -> Vec<ReplicatedEntry<C>>;

    /// Grants the caller access to the live entry at `index` (the one
    /// still holding its bound continuation), for `entry.notify<Event>`
    /// (spec §4.5). Returns `false` if `index` is not a live entry.
    fn with_entry_mut<F>(&mut self, index: u64, f: F) -> bool
    where
        F: FnOnce(&mut LogEntry<C, R>);
}

/// A replicable view of one entry: its index, term, and value, without
/// exposing the continuation slot outside the owning actor.
#[derive(Debug, Clone)]
pub struct ReplicatedEntry<C> {
    pub index: u64,
    pub term: u64,
    pub value: EntryValue<C>,
}

/// Deterministic function that consumes committed commands and produces
/// results and snapshots (spec GLOSSARY "State machine").
///
/// `apply` is the only method allowed to fail as part of ordinary
/// application logic (mirroring the teacher's own note on
/// `RaftStorage::apply_entry_to_state_machine`: "the only method which is
/// allowed to return errors normally"). An `Err` here means the command at
/// the head of the applier queue could not be applied right now; the
/// applier stops and retries the same entry later rather than skipping
/// past it or advancing `last_applied` (spec §4.6 "If the state machine
/// raises, stop and retry later").
pub trait StateMachine: Send + Sync {
    type Command: Clone + Send + Sync + 'static;
    type Response: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn apply(&mut self, command: &Self::Command) -> Result<Self::Response, Self::Error>;
    fn snapshot(&mut self) -> Vec<u8>;
    fn restore(&mut self, snapshot: &[u8]);
}
