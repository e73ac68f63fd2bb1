//! In-memory `Log`/`StateMachine` collaborators for `chamber`'s Raft
//! actor, mirroring the role the teacher's `memstore` crate plays for
//! `async-raft`: a reference implementation good enough for tests and
//! small examples, not meant for production durability.

use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;

use chamber::raft::{EntryValue, Log, LogEntry, ReplicatedEntry, StateMachine};

/// A `VecDeque`-backed log. Entries after the snapshot prefix are kept
/// in memory only; nothing here is durable across process restarts
/// (spec Non-goals: persistence is out of scope for `chamber` itself).
pub struct MemLog<C, R> {
    snapshot_index: u64,
    snapshot_term: u64,
    snapshot_bytes: Vec<u8>,
    entries: VecDeque<LogEntry<C, R>>,
}

impl<C: Clone, R> MemLog<C, R> {
    pub fn new() -> Self {
        MemLog {
            snapshot_index: 0,
            snapshot_term: 0,
            snapshot_bytes: Vec::new(),
            entries: VecDeque::new(),
        }
    }

    fn position_of(&self, index: u64) -> Option<usize> {
        if index <= self.snapshot_index {
            return None;
        }
        let pos = index - self.snapshot_index - 1;
        let pos = usize::try_from(pos).ok()?;
        if pos < self.entries.len() {
            Some(pos)
        } else {
            None
        }
    }
}

impl<C: Clone, R> Default for MemLog<C, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, R> Log<C, R> for MemLog<C, R>
where
    C: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    fn snapshot_term(&self) -> u64 {
        self.snapshot_term
    }

    fn snapshot(&self) -> Vec<u8> {
        self.snapshot_bytes.clone()
    }

    fn last_index(&self) -> u64 {
        self.snapshot_index + self.entries.len() as u64
    }

    fn last_term(&self) -> u64 {
        match self.entries.back() {
            Some(e) => e.term,
            None => self.snapshot_term,
        }
    }

    fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.position_of(index).map(|pos| self.entries[pos].term)
    }

    fn push(&mut self, entry: LogEntry<C, R>) -> u64 {
        self.entries.push_back(entry);
        self.last_index()
    }

    fn truncate(&mut self, index: u64) -> Vec<LogEntry<C, R>> {
        let keep = if index <= self.snapshot_index {
            0
        } else {
            (index - self.snapshot_index - 1) as usize
        };
        let keep = keep.min(self.entries.len());
        self.entries.split_off(keep).into_iter().collect()
    }

    fn set_snapshot(&mut self, index: u64, term: u64, snapshot: Vec<u8>) {
        let drop_count = index.saturating_sub(self.snapshot_index) as usize;
        for _ in 0..drop_count.min(self.entries.len()) {
            self.entries.pop_front();
        }
        self.snapshot_index = index;
        self.snapshot_term = term;
        self.snapshot_bytes = snapshot;
    }

    fn entries_from(&self, from: u64, max_count: usize) -> Vec<ReplicatedEntry<C>> {
        let start_pos = if from >= self.snapshot_index {
            (from - self.snapshot_index) as usize
        } else {
            0
        };
        self.entries
            .iter()
            .enumerate()
            .skip(start_pos)
            .take(max_count)
            .map(|(pos, e)| ReplicatedEntry {
                index: self.snapshot_index + pos as u64 + 1,
                term: e.term,
                value: e.value.clone(),
            })
            .collect()
    }

    fn with_entry_mut<F>(&mut self, index: u64, f: F) -> bool
    where
        F: FnOnce(&mut LogEntry<C, R>),
    {
        match self.position_of(index) {
            Some(pos) => {
                f(&mut self.entries[pos]);
                true
            }
            None => false,
        }
    }
}

/// A tiny key/value command set for tests and examples, mirroring the
/// shape of `memstore`'s `ClientRequest`/`ClientResponse`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum KvCommand {
    Set { key: String, value: String },
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KvResponse {
    Set,
    Deleted { existed: bool },
}

/// In-memory key/value state machine applying [`KvCommand`]s.
#[derive(Debug, Default)]
pub struct KvStateMachine {
    table: HashMap<String, String>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        KvStateMachine::default()
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.table.get(key)
    }
}

impl StateMachine for KvStateMachine {
    type Command = KvCommand;
    type Response = KvResponse;
    type Error = std::convert::Infallible;

    fn apply(&mut self, command: &KvCommand) -> Result<KvResponse, std::convert::Infallible> {
        Ok(match command {
            KvCommand::Set { key, value } => {
                self.table.insert(key.clone(), value.clone());
                KvResponse::Set
            }
            KvCommand::Delete { key } => {
                let existed = self.table.remove(key).is_some();
                KvResponse::Deleted { existed }
            }
        })
    }

    fn snapshot(&mut self) -> Vec<u8> {
        serde_json::to_vec(&self.table).unwrap_or_default()
    }

    fn restore(&mut self, snapshot: &[u8]) {
        self.table = serde_json::from_slice(snapshot).unwrap_or_default();
    }
}
