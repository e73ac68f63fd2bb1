//! The session multiplexer (spec §3 "Session", §4.3, §4.4): owns a
//! transport, allocates channels, routes incoming frames to dispatches,
//! forks outgoing upstreams, and tears everything down on detach.
//!
//! Modeled as the "chamber" of spec §5: two cooperative tasks (pull loop,
//! push queue) per attached session, sharing a mutex-guarded channel map —
//! the one piece of state spec §5 calls out as reachable from any thread
//! (`fork`).

pub mod channel;
pub mod control;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatch::{Dispatch, Transition};
use crate::error::{Category, DispatchError, ErrorCode};
use crate::frame::{self, Decoder, Frame, Header, Value};
use crate::header::HeaderTable;
use crate::trace::TraceContext;
use crate::upstream::{FrameSink, Upstream};

use channel::ChannelRecord;
use control::{is_control_id, ControlDispatch, Revoker};

struct WriteItem {
    channel_id: u64,
    ty: u64,
    args: Value,
    headers: Option<Vec<Header>>,
    trace: Option<TraceContext>,
}

/// The three reserved tracing header names (spec §3, §6): always stripped
/// from any user-supplied headers and re-emitted fresh from the current
/// trace context (spec §4.1).
fn is_trace_header_name(name: &[u8]) -> bool {
    matches!(name, b"trace_id" | b"span_id" | b"parent_id")
}

struct SessionInner {
    channels: Mutex<HashMap<u64, ChannelRecord>>,
    max_channel_id: AtomicU64,
    prototype: Arc<dyn Dispatch>,
    control: Arc<ControlDispatch>,
    write_tx: mpsc::UnboundedSender<WriteItem>,
    in_flight_read_bytes: AtomicUsize,
    in_flight_write_bytes: AtomicUsize,
    detached: AtomicBool,
}

impl FrameSink for SessionInner {
    fn send_frame(
        &self,
        channel_id: u64,
        ty: u64,
        args: Value,
        headers: Option<Vec<Header>>,
        trace: Option<TraceContext>,
    ) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        let _ = self.write_tx.send(WriteItem {
            channel_id,
            ty,
            args,
            headers,
            trace,
        });
    }
}

impl Revoker for SessionInner {
    fn revoke(&self, channel_id: u64, ec: ErrorCode) {
        self.revoke_channel(channel_id, ec);
    }
}

impl SessionInner {
    fn revoke_channel(&self, channel_id: u64, ec: ErrorCode) {
        let removed = self.channels.lock().unwrap().remove(&channel_id);
        match removed {
            Some(record) => record.dispatch.discard(ec),
            None => tracing::warn!(channel_id, "revoke of already-revoked or unknown channel"),
        }
    }

    fn fork(self: &Arc<Self>, dispatch: Option<Arc<dyn Dispatch>>) -> Upstream {
        let channel_id = self.max_channel_id.fetch_add(1, Ordering::AcqRel) + 1;
        let sink: Arc<dyn FrameSink> = self.clone();
        let upstream = Upstream::new(sink, channel_id);
        if let Some(dispatch) = dispatch {
            let record = ChannelRecord::new(dispatch, upstream.clone());
            self.channels.lock().unwrap().insert(channel_id, record);
        }
        upstream
    }

    /// Implements spec §4.3 steps 1-6 for one incoming frame.
    fn process_incoming(self: &Arc<Self>, frame: Frame) {
        let channel_id = frame.span;
        let existing = {
            let channels = self.channels.lock().unwrap();
            channels
                .get(&channel_id)
                .map(|r| (r.dispatch.clone(), r.upstream.clone()))
        };

        let (dispatch, upstream) = match existing {
            Some(pair) => pair,
            None => {
                if channel_id <= self.max_channel_id.load(Ordering::Acquire) {
                    // A frame arrived for a channel id that was already
                    // issued and has since been revoked. The original
                    // throws `revoked_channel` here, which unwinds through
                    // `pull_action_t::finalize()` into a session detach
                    // (spec §4.3) — not a silently dropped frame.
                    self.detach(ErrorCode::from(&DispatchError::RevokedChannel));
                    return;
                }
                self.max_channel_id.store(channel_id, Ordering::Release);
                let dispatch: Arc<dyn Dispatch> = if is_control_id(frame.ty) {
                    self.control.clone()
                } else {
                    self.prototype.clone()
                };
                let sink: Arc<dyn FrameSink> = self.clone();
                let upstream = Upstream::new(sink, channel_id);
                let mut record = ChannelRecord::new(dispatch.clone(), upstream.clone());
                record.opened_trace = extract_trace(&frame);
                self.channels.lock().unwrap().insert(channel_id, record);
                (dispatch, upstream)
            }
        };

        if let Some(record) = self.channels.lock().unwrap().get(&channel_id) {
            record.meters.record_in();
        }

        let trace = extract_trace(&frame);
        let dispatch_span = match trace {
            Some(t) => tracing::debug_span!(
                "session.dispatch",
                channel_id,
                trace_id = t.trace_id,
                span_id = t.span_id,
                parent_id = t.parent_id
            ),
            None => tracing::debug_span!("session.dispatch", channel_id),
        };
        let _enter = dispatch_span.enter();
        // Wrap the invocation in the extracted trace scope (spec §4.4);
        // safe as a plain thread-local guard since dispatch bodies are
        // synchronous from the chamber's perspective (spec §5).
        let _trace_guard = trace.map(crate::trace::enter);

        match dispatch.process(&frame, &upstream) {
            Ok(Transition::Recur) => {}
            Ok(Transition::Switch(next)) => {
                if let Some(record) = self.channels.lock().unwrap().get_mut(&channel_id) {
                    record.dispatch = next;
                }
            }
            Ok(Transition::Terminal) => {
                self.revoke_channel(channel_id, ErrorCode::new(Category::Dispatch, 0));
            }
            Err(e) => {
                // spec §4.3: "exceptions propagate; any uncaught error from
                // the slot detaches the session" (see §7).
                tracing::error!(channel_id, error = %e, "uncaught dispatch error");
                self.detach(ErrorCode::from(&DispatchError::UncaughtError(e.to_string())));
            }
        }
    }

    fn detach(self: &Arc<Self>, ec: ErrorCode) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        let channels = {
            let mut guard = self.channels.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (_, record) in channels {
            record.dispatch.discard(ec);
        }
        // Breaks the control -> session back-reference cycle set up by
        // `control.bind` in `Session::attach` (spec §9 "Cyclic ownership").
        self.control.unbind();
    }
}

/// Overrides any user-supplied `trace_id`/`span_id`/`parent_id` headers
/// with fresh ones from `trace` (spec §4.1). Returns `None` (no headers
/// array on the wire) only when there was neither an explicit headers
/// array nor an active trace context to stamp.
fn merge_trace_headers(
    headers: Option<Vec<Header>>,
    trace: Option<TraceContext>,
) -> Option<Vec<Header>> {
    let had_headers_field = headers.is_some() || trace.is_some();
    let mut headers = headers.unwrap_or_default();
    headers.retain(|h| !is_trace_header_name(&h.name));
    if let Some(t) = trace {
        headers.push(Header::new(&b"trace_id"[..], t.trace_id.to_be_bytes().to_vec()));
        headers.push(Header::new(&b"span_id"[..], t.span_id.to_be_bytes().to_vec()));
        headers.push(Header::new(&b"parent_id"[..], t.parent_id.to_be_bytes().to_vec()));
    }
    if had_headers_field {
        Some(headers)
    } else {
        None
    }
}

fn extract_trace(frame: &Frame) -> Option<TraceContext> {
    let headers = frame.headers.as_ref()?;
    let mut trace_id = None;
    let mut span_id = None;
    let mut parent_id = None;
    for h in headers {
        let value = be_u64(&h.value)?;
        match &h.name[..] {
            b"trace_id" => trace_id = Some(value),
            b"span_id" => span_id = Some(value),
            b"parent_id" => parent_id = Some(value),
            _ => {}
        }
    }
    Some(TraceContext {
        trace_id: trace_id?,
        span_id: span_id?,
        parent_id: parent_id?,
    })
}

fn be_u64(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// A live, attached session over a transport (spec §3). Cloning a
/// `Session` shares the same underlying chamber state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    pull_handle: Arc<JoinHandle<()>>,
    push_handle: Arc<JoinHandle<()>>,
}

impl Session {
    /// Attaches a transport, spawning the pull loop and push queue tasks
    /// (spec §4.4).
    pub fn attach<T>(transport: T, prototype: Arc<dyn Dispatch>) -> Session
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(transport);
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteItem>();
        let control = ControlDispatch::new();

        let inner = Arc::new(SessionInner {
            channels: Mutex::new(HashMap::new()),
            max_channel_id: AtomicU64::new(0),
            prototype,
            control: control.clone(),
            write_tx,
            in_flight_read_bytes: AtomicUsize::new(0),
            in_flight_write_bytes: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
        });
        control.bind(inner.clone() as Arc<dyn Revoker>);

        let push_inner = inner.clone();
        let push_handle = tokio::spawn(async move {
            let mut write_table = HeaderTable::new();
            while let Some(item) = write_rx.recv().await {
                let span = tracing::debug_span!("session.push", channel_id = item.channel_id);
                let _enter = span.enter();
                let frame = Frame {
                    span: item.channel_id,
                    ty: item.ty,
                    args: item.args,
                    headers: merge_trace_headers(item.headers, item.trace),
                };
                let bytes = frame::encode(&frame, &mut write_table);
                push_inner
                    .in_flight_write_bytes
                    .fetch_add(bytes.len(), Ordering::Relaxed);
                if write_half.write_all(&bytes).await.is_err() {
                    push_inner.detach(ErrorCode::new(Category::Dispatch, 3));
                    break;
                }
                push_inner
                    .in_flight_write_bytes
                    .fetch_sub(bytes.len(), Ordering::Relaxed);
            }
        });

        let pull_inner = inner.clone();
        let pull_handle = tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let mut read_table = HeaderTable::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => {
                        pull_inner.detach(ErrorCode::new(Category::Dispatch, 3));
                        break;
                    }
                    Ok(n) => n,
                    Err(_) => {
                        pull_inner.detach(ErrorCode::new(Category::Dispatch, 3));
                        break;
                    }
                };
                pull_inner
                    .in_flight_read_bytes
                    .fetch_add(n, Ordering::Relaxed);
                decoder.feed(&buf[..n]);
                loop {
                    match decoder.poll_frame(&mut read_table) {
                        Ok(Some(frame)) => {
                            let span = tracing::debug_span!("session.pull", channel_id = frame.span);
                            let _enter = span.enter();
                            pull_inner.process_incoming(frame);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            pull_inner.detach(ErrorCode::from(&e));
                            return;
                        }
                    }
                }
                pull_inner
                    .in_flight_read_bytes
                    .fetch_sub(n, Ordering::Relaxed);
            }
        });

        Session {
            inner,
            pull_handle: Arc::new(pull_handle),
            push_handle: Arc::new(push_handle),
        }
    }

    /// Forks a new outgoing channel (spec §4.3 "Forking"). `dispatch` is
    /// `None` for a "mute" channel: the caller promises no response will
    /// come and no record is kept.
    pub fn fork(&self, dispatch: Option<Arc<dyn Dispatch>>) -> Upstream {
        self.inner.fork(dispatch)
    }

    /// Explicit local revocation (e.g. the owner of a channel giving up
    /// on it without a `Terminal` transition).
    pub fn revoke(&self, channel_id: u64, ec: ErrorCode) {
        self.inner.revoke_channel(channel_id, ec);
    }

    /// Detaches the session: drops the transport, fails every attached
    /// dispatch with `discard(ec)` exactly once (spec §4.4). Idempotent.
    pub fn detach(&self, ec: ErrorCode) {
        self.inner.detach(ec);
        self.pull_handle.abort();
        self.push_handle.abort();
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().unwrap().len()
    }

    pub fn in_flight_bytes(&self) -> usize {
        self.inner.in_flight_read_bytes.load(Ordering::Relaxed)
            + self.inner.in_flight_write_bytes.load(Ordering::Relaxed)
    }

    pub fn max_channel_id(&self) -> u64 {
        self.inner.max_channel_id.load(Ordering::Relaxed)
    }
}
