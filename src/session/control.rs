//! The session's internal control dispatch (spec §4.4): handles `ping`
//! (no-op) and `revoke(channel_id, ec)` (peer-initiated channel teardown).
//! Its message ids start immediately above the user prototype's id space;
//! here that's modeled as a fixed high range so no prototype ever collides
//! with it by accident.

use std::sync::Arc;

use crate::dispatch::{Dispatch, Graph, GraphEntry, NextState, Transition};
use crate::error::{Category, DispatchError, ErrorCode};
use crate::frame::{Frame, Value};
use crate::upstream::Upstream;

/// First id in the control dispatch's reserved range (spec §4.4: "ids
/// start immediately above the user prototype's id space"). Chosen far
/// above any realistic prototype graph so no user protocol needs to avoid
/// it.
pub const CONTROL_ID_BASE: u64 = u64::MAX - 16;
pub const PING_ID: u64 = CONTROL_ID_BASE;
pub const REVOKE_ID: u64 = CONTROL_ID_BASE + 1;

pub fn is_control_id(ty: u64) -> bool {
    ty >= CONTROL_ID_BASE
}

/// Anything a control dispatch can ask the owning session to do. Kept as
/// a narrow trait, rather than handing the control dispatch the whole
/// `Session`, so the cyclic reference stays obviously bounded (spec §9
/// "Cyclic ownership").
pub trait Revoker: Send + Sync {
    fn revoke(&self, channel_id: u64, ec: ErrorCode);
}

pub struct ControlDispatch {
    session: std::sync::Mutex<Option<Arc<dyn Revoker>>>,
    graph: Graph,
}

impl ControlDispatch {
    pub fn new() -> Arc<Self> {
        let graph = Graph::new()
            .with_entry(
                PING_ID,
                GraphEntry {
                    name: "ping".into(),
                    argument_shape: "()".into(),
                    next: NextState::Recurrent,
                },
            )
            .with_entry(
                REVOKE_ID,
                GraphEntry {
                    name: "revoke".into(),
                    argument_shape: "(channel_id: u64, error_code: (u32, i32))".into(),
                    next: NextState::Recurrent,
                },
            );
        Arc::new(ControlDispatch {
            session: std::sync::Mutex::new(None),
            graph,
        })
    }

    /// Bound once, after the owning session is constructed (the session
    /// can't hand out an `Arc` to itself before the `Arc` exists). This
    /// creates a strong `session -> control -> session` cycle by
    /// construction; [`ControlDispatch::unbind`] is the one place that
    /// breaks it, called from the session's detach path alongside the
    /// channel-map clear (spec §9 "Cyclic ownership").
    pub fn bind(&self, session: Arc<dyn Revoker>) {
        *self.session.lock().unwrap() = Some(session);
    }

    /// Drops the back-reference to the owning session, breaking the
    /// `session -> control -> session` cycle created by `bind`. Idempotent.
    pub fn unbind(&self) {
        self.session.lock().unwrap().take();
    }

    #[cfg(test)]
    pub(crate) fn is_unbound(&self) -> bool {
        self.session.lock().unwrap().is_none()
    }

    fn parse_revoke(args: &Value) -> Option<(u64, ErrorCode)> {
        let items = args.as_array()?;
        if items.len() != 2 {
            return None;
        }
        let channel_id = items[0].as_uint()?;
        let pair = items[1].as_array()?;
        if pair.len() != 2 {
            return None;
        }
        let category = Category::from_wire(pair[0].as_uint()? as u32);
        let value = match &pair[1] {
            Value::Int(v) => *v as i32,
            Value::Uint(v) => *v as i32,
            _ => return None,
        };
        Some((channel_id, ErrorCode::new(category, value)))
    }
}

impl Dispatch for ControlDispatch {
    fn process(&self, frame: &Frame, _upstream: &Upstream) -> Result<Transition, DispatchError> {
        match frame.ty {
            PING_ID => Ok(Transition::Recur),
            REVOKE_ID => {
                if let Some((channel_id, ec)) = Self::parse_revoke(&frame.args) {
                    if let Some(session) = self.session.lock().unwrap().as_ref() {
                        session.revoke(channel_id, ec);
                    }
                } else {
                    tracing::warn!("malformed control::revoke frame");
                }
                Ok(Transition::Recur)
            }
            other => {
                tracing::warn!(ty = other, "unknown control message id");
                Ok(Transition::Recur)
            }
        }
    }

    fn discard(&self, _ec: ErrorCode) {}

    fn root(&self) -> &Graph {
        &self.graph
    }

    fn name(&self) -> &str {
        "control"
    }
}
