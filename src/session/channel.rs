//! Per-channel bookkeeping (spec §3 "Channel record").

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch::Dispatch;
use crate::upstream::Upstream;

pub use crate::trace::TraceContext;

/// Cheap per-channel counters, part of the observability surface ambient
/// to any connection-scoped resource (SPEC_FULL §2.4, spec §5 "resource
/// budgets").
#[derive(Debug, Default)]
pub struct Meters {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
}

impl Meters {
    pub fn record_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_in(&self) -> u64 {
        self.frames_in.load(Ordering::Relaxed)
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out.load(Ordering::Relaxed)
    }
}

/// Per live channel: `{dispatch, upstream, opened_trace?, meters}` (spec
/// §3). A channel with no `dispatch` is "mute" (spec §4.3 `fork`):
/// outgoing-only, no record is actually kept for those, so `dispatch` here
/// is never `None` for a stored record — it is `Option` only to make the
/// in-place `Switch` update ergonomic while swapping dispatches.
pub struct ChannelRecord {
    pub dispatch: Arc<dyn Dispatch>,
    pub upstream: Upstream,
    pub opened_trace: Option<TraceContext>,
    pub meters: Meters,
}

impl ChannelRecord {
    pub fn new(dispatch: Arc<dyn Dispatch>, upstream: Upstream) -> Self {
        ChannelRecord {
            dispatch,
            upstream,
            opened_trace: None,
            meters: Meters::default(),
        }
    }
}
