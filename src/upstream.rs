//! The write-side handle on a channel (spec §3 "Upstream"): a handle
//! `(session, channel_id)` that, when asked to send a typed message, emits
//! a frame with the given channel id on the owning session. An upstream
//! does not know or enforce dispatch-graph state; the dispatch it belongs
//! to does (spec §4.3).
//!
//! `Upstream` is defined independently of `session` so that `dispatch` (which
//! needs it in its `process` signature) and `session` (which constructs it)
//! don't need to depend on each other directly — the cycle the session owns
//! a channel which owns an upstream which points back at the session (spec
//! §9 "Cyclic ownership") is expressed through this `FrameSink` trait object
//! rather than a concrete `Session` type.

use std::sync::Arc;

use crate::frame::{Header, Value};
use crate::trace::TraceContext;

/// Anything that can accept an outgoing frame for a given channel. The
/// session implements this; tests may supply a recording fake.
///
/// `trace` is a snapshot of [`crate::trace::current`] taken at the moment
/// `send`/`send_with_headers` was called, not re-read by the sink — by the
/// time a sink such as the session's push queue processes this frame it
/// may be running on a different task, where the thread-local ambient
/// context set during the originating dispatch call no longer applies
/// (spec §4.1, §5).
pub trait FrameSink: Send + Sync {
    fn send_frame(
        &self,
        channel_id: u64,
        ty: u64,
        args: Value,
        headers: Option<Vec<Header>>,
        trace: Option<TraceContext>,
    );
}

/// A `(session, channel_id)` handle (spec §3, §4.3).
#[derive(Clone)]
pub struct Upstream {
    sink: Arc<dyn FrameSink>,
    channel_id: u64,
}

impl Upstream {
    pub fn new(sink: Arc<dyn FrameSink>, channel_id: u64) -> Self {
        Upstream { sink, channel_id }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn send(&self, ty: u64, args: Value) {
        self.sink
            .send_frame(self.channel_id, ty, args, None, crate::trace::current());
    }

    pub fn send_with_headers(&self, ty: u64, args: Value, headers: Vec<Header>) {
        self.sink.send_frame(
            self.channel_id,
            ty,
            args,
            Some(headers),
            crate::trace::current(),
        );
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<(u64, u64, Value, Option<Vec<Header>>, Option<TraceContext>)>>,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(
            &self,
            channel_id: u64,
            ty: u64,
            args: Value,
            headers: Option<Vec<Header>>,
            trace: Option<TraceContext>,
        ) {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id, ty, args, headers, trace));
        }
    }
}
