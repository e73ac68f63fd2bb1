//! Ambient trace-context propagation across one dispatch invocation (spec
//! §4.1: "the three tracing headers are always emitted fresh from the
//! current trace context, overriding any user-supplied headers of the
//! same name"; §4.4: "the decoder... constructs a trace scope used to wrap
//! the subsequent dispatch invocation").
//!
//! Dispatch bodies are synchronous from the chamber's perspective (spec
//! §5: "dispatch slot bodies are synchronous... any work they need must
//! complete inline or be re-posted"), so a thread-local scope guard is
//! enough here — there is no suspension point inside `process` for the
//! value to need to survive across.

use std::cell::Cell;

/// `trace_id`/`span_id`/`parent_id`, each an 8-byte big-endian unsigned
/// integer on the wire (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
}

thread_local! {
    static CURRENT: Cell<Option<TraceContext>> = Cell::new(None);
}

/// Whatever trace context is active on the calling thread right now.
/// Snapshotted by [`crate::upstream::Upstream::send`] at call time so it
/// survives the hop onto the session's push queue, which runs as a
/// separate task (SPEC_FULL §2.4).
pub fn current() -> Option<TraceContext> {
    CURRENT.with(|c| c.get())
}

/// Enters `ctx` for the lifetime of the returned guard.
pub fn enter(ctx: TraceContext) -> Guard {
    let prev = CURRENT.with(|c| c.replace(Some(ctx)));
    Guard { prev }
}

pub struct Guard {
    prev: Option<TraceContext>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.prev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_restores_previous_on_drop() {
        assert!(current().is_none());
        let outer = TraceContext {
            trace_id: 1,
            span_id: 2,
            parent_id: 3,
        };
        {
            let _g1 = enter(outer);
            assert_eq!(current(), Some(outer));
            let inner = TraceContext {
                trace_id: 4,
                span_id: 5,
                parent_id: 6,
            };
            {
                let _g2 = enter(inner);
                assert_eq!(current(), Some(inner));
            }
            assert_eq!(current(), Some(outer));
        }
        assert!(current().is_none());
    }
}
