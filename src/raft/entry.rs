//! The Raft log entry: `{nop, command(v)}` tagged with a term, a bound
//! user-completion continuation, and a one-shot notification protocol
//! (spec §3 "Raft log", §4.5).
//!
//! Grounded in `examples/original_source/include/cocaine/detail/raft/entry.hpp`:
//! `bind<Event>` attaches a typed handler; `notify<Event>(result)` delivers
//! once then clears; `notify(error)` delivers an error regardless of the
//! entry's value, used when the entry is discarded (truncated or orphaned
//! by a leadership change before commit).

use crate::error::RaftError;

/// The value carried by one log entry.
#[derive(Debug, Clone)]
pub enum EntryValue<C> {
    /// Appended once per leadership transition so that prior-term entries
    /// can be committed transitively (spec §4.6 commit rule).
    Nop,
    /// An application command awaiting application to the state machine.
    Command(C),
}

/// A boxed completion: delivered the command's result on apply, or a
/// `RaftError` if the entry is discarded before it gets there.
type Continuation<R> = Box<dyn FnOnce(Result<R, RaftError>) + Send>;

/// One entry in the replicated log (spec §3).
pub struct LogEntry<C, R> {
    pub term: u64,
    pub value: EntryValue<C>,
    continuation: Option<Continuation<R>>,
}

impl<C, R> LogEntry<C, R> {
    pub fn nop(term: u64) -> Self {
        LogEntry {
            term,
            value: EntryValue::Nop,
            continuation: None,
        }
    }

    pub fn command(term: u64, command: C) -> Self {
        LogEntry {
            term,
            value: EntryValue::Command(command),
            continuation: None,
        }
    }

    /// Reconstructs an entry replicated from a leader, with no
    /// continuation bound — only the leader that originated a command
    /// ever holds its completion handler (spec §4.6 "Leader side").
    pub fn from_value(term: u64, value: EntryValue<C>) -> Self {
        LogEntry {
            term,
            value,
            continuation: None,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self.value, EntryValue::Command(_))
    }

    /// Attaches a completion handler to a just-pushed command entry.
    /// Overwrites any previously bound handler without notifying it —
    /// callers are expected to bind exactly once, immediately after push.
    pub fn bind(&mut self, continuation: Continuation<R>) {
        self.continuation = Some(continuation);
    }

    /// Delivers the state machine's result to the bound handler exactly
    /// once, then clears it. A no-op if nothing is bound (e.g. a `Nop`
    /// entry, or an entry whose handler already fired).
    pub fn notify_ok(&mut self, result: R) {
        if let Some(continuation) = self.continuation.take() {
            continuation(Ok(result));
        }
    }

    /// Delivers an error to the bound handler regardless of the entry's
    /// value, used when the entry is truncated or orphaned by a
    /// leadership change before commit (spec §3 "Lifecycles").
    pub fn notify_err(&mut self, error: RaftError) {
        if let Some(continuation) = self.continuation.take() {
            continuation(Err(error));
        }
    }
}

impl<C: std::fmt::Debug, R> std::fmt::Debug for LogEntry<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEntry")
            .field("term", &self.term)
            .field("value", &self.value)
            .field("bound", &self.continuation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn notify_ok_delivers_exactly_once() {
        let (tx, rx) = mpsc::channel();
        let mut entry: LogEntry<String, u64> = LogEntry::command(1, "set x 1".into());
        entry.bind(Box::new(move |r| {
            tx.send(r).unwrap();
        }));
        entry.notify_ok(42);
        entry.notify_ok(43);
        assert_eq!(rx.try_recv().unwrap(), Ok(42));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notify_err_overrides_regardless_of_value() {
        let (tx, rx) = mpsc::channel();
        let mut entry: LogEntry<String, u64> = LogEntry::nop(1);
        entry.bind(Box::new(move |r| {
            tx.send(r).unwrap();
        }));
        entry.notify_err(RaftError::Unknown);
        assert_eq!(rx.try_recv().unwrap(), Err(RaftError::Unknown));
    }
}
