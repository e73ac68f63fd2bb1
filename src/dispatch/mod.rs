//! The dispatch graph, the `Dispatch` trait, and channel transitions
//! (spec §3 "Dispatch graph", §4.3).
//!
//! Re-architected per spec §9 ("inheritance-heavy codebase... re-architect
//! as tagged variants plus a small trait-set") away from the original's
//! slot class hierarchy (`examples/original_source/include/cocaine/slot.hpp`):
//! the graph itself is pure data (a `Graph` value), and a dispatch is just
//! the small capability set `{process, discard, root, name}`.

pub mod echo;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DispatchError, ErrorCode};
use crate::frame::Frame;
use crate::upstream::Upstream;

/// What a message id in a dispatch graph transitions to (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextState {
    /// Stay in the same dispatch.
    Recurrent,
    /// Close the channel on this side.
    Terminal,
    /// Switch to a named successor dispatch for subsequent messages.
    Transition(String),
}

/// Static description of one message id: its human-readable name and what
/// it transitions to. `argument_shape` is left as free-form documentation
/// text since this crate has no schema compiler (spec §1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEntry {
    pub name: String,
    pub argument_shape: String,
    pub next: NextState,
}

/// An immutable `message_id -> GraphEntry` description of a protocol,
/// expressed as a value rather than as a class (spec §9).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    entries: HashMap<u64, GraphEntry>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn with_entry(mut self, id: u64, entry: GraphEntry) -> Self {
        self.entries.insert(id, entry);
        self
    }

    pub fn get(&self, id: u64) -> Option<&GraphEntry> {
        self.entries.get(&id)
    }
}

/// What a dispatch returns after handling one frame (spec §4.3).
pub enum Transition {
    /// Stay installed for future frames on this channel.
    Recur,
    /// Install a new dispatch for future frames on this channel.
    Switch(Arc<dyn Dispatch>),
    /// The channel is done on this side.
    Terminal,
}

/// The capability set every dispatch implements (spec §4.3, §9).
pub trait Dispatch: Send + Sync {
    /// Handle one incoming frame, returning how the channel should
    /// continue. An `Err` here is the `UncaughtError` path (spec §4.3:
    /// "exceptions propagate; any uncaught error from the slot detaches
    /// the session") — the caller detaches the whole session on it,
    /// mirroring the original's `pull_action_t::finalize()` catching
    /// whatever a slot body threw.
    fn process(&self, frame: &Frame, upstream: &Upstream) -> Result<Transition, DispatchError>;

    /// Called exactly once if the channel is revoked or the session
    /// detaches while this dispatch is attached (spec §4.3, §8 "Dispatch
    /// lifecycle").
    fn discard(&self, ec: ErrorCode);

    /// The protocol graph this dispatch implements.
    fn root(&self) -> &Graph;

    /// Human-readable name, used in logging.
    fn name(&self) -> &str;
}
