//! `EchoDispatch`: the simplest possible [`Dispatch`] implementor, used by
//! this crate's own integration tests (SPEC_FULL §2.3) — the same role the
//! teacher's sibling `memstore` crate plays as the simplest `RaftStorage`
//! implementor. Grounded in spec §8 scenario 1 ("single-peer echo").

use std::sync::Arc;

use crate::error::{DispatchError, ErrorCode};
use crate::frame::{Frame, Value};
use crate::upstream::Upstream;

use super::{Dispatch, Graph, GraphEntry, NextState, Transition};

/// The single message id this dispatch accepts.
pub const ECHO_SLOT_ID: u64 = 0;
/// Reply carrying the echoed arguments.
pub const CHUNK_ID: u64 = 0;
/// Reply signalling end of stream (empty arguments).
pub const CHOKE_ID: u64 = 1;

#[derive(Debug, Default)]
pub struct EchoDispatch {
    graph: Graph,
}

impl EchoDispatch {
    pub fn new() -> Arc<Self> {
        let graph = Graph::new().with_entry(
            ECHO_SLOT_ID,
            GraphEntry {
                name: "echo_slot".into(),
                argument_shape: "(value: bytes)".into(),
                next: NextState::Terminal,
            },
        );
        Arc::new(EchoDispatch { graph })
    }
}

impl Dispatch for EchoDispatch {
    fn process(&self, frame: &Frame, upstream: &Upstream) -> Result<Transition, DispatchError> {
        if frame.ty != ECHO_SLOT_ID {
            return Ok(Transition::Terminal);
        }
        upstream.send(CHUNK_ID, frame.args.clone());
        upstream.send(CHOKE_ID, Value::Array(vec![]));
        Ok(Transition::Terminal)
    }

    fn discard(&self, ec: ErrorCode) {
        tracing::debug!(?ec, "echo dispatch discarded");
    }

    fn root(&self) -> &Graph {
        &self.graph
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::test_support::RecordingSink;

    #[test]
    fn echoes_args_then_closes() {
        let dispatch = EchoDispatch::new();
        let sink = Arc::new(RecordingSink::default());
        let upstream = Upstream::new(sink.clone(), 1);
        let frame = Frame::new(1, ECHO_SLOT_ID, Value::Array(vec![Value::bytes(&b"hello"[..])]));

        let transition = dispatch.process(&frame, &upstream).unwrap();
        assert!(matches!(transition, Transition::Terminal));

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, CHUNK_ID);
        assert_eq!(sent[0].2, frame.args);
        assert_eq!(sent[1].1, CHOKE_ID);
        assert_eq!(sent[1].2, Value::Array(vec![]));
    }
}
