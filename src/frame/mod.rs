//! The wire frame: `(span, type, args, headers?)` (spec §3, §4.1, §6).
//!
//! Encoding is single-shot per frame, buffer grows by doubling (`BytesMut`
//! already does this); decoding is exposed both as a one-shot function and
//! as a [`Decoder`] that retains a partial frame across `NeedMore` results
//! so a session's pull loop doesn't re-scan from the start on every read.

pub mod value;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use value::Value;
use value::DecodeOutcome;

use crate::error::TransportError;
use crate::header::HeaderTable;

/// A decoded, uncompressed header pair ready to hand to application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: Bytes,
    pub value: Bytes,
}

impl Header {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size charged against the dynamic table's capacity (spec §3/§4.2).
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub span: u64,
    pub ty: u64,
    pub args: Value,
    pub headers: Option<Vec<Header>>,
}

impl Frame {
    pub fn new(span: u64, ty: u64, args: Value) -> Self {
        Frame {
            span,
            ty,
            args,
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Encodes `frame` against `table` (the writer-side header table), growing
/// `out` as needed. Header encoding follows spec §4.1: an exact match in
/// the combined table is emitted as a single index; otherwise a 3-tuple
/// `[store, name_repr, value_bytes]` is emitted and, if `store`, both this
/// call and the eventual decoder insert the header into their dynamic
/// tables.
pub fn encode(frame: &Frame, table: &mut HeaderTable) -> BytesMut {
    let mut out = BytesMut::with_capacity(128);
    let has_headers = frame.headers.is_some();
    out.put_u8(if has_headers { 4 } else { 3 });
    out.put_u64(frame.span);
    out.put_u64(frame.ty);
    frame.args.encode(&mut out);
    if let Some(headers) = &frame.headers {
        let mut entries = Vec::with_capacity(headers.len());
        for header in headers {
            entries.push(encode_header(header, table));
        }
        Value::Array(entries).encode(&mut out);
    }
    out
}

fn encode_header(header: &Header, table: &mut HeaderTable) -> Value {
    if let Some(idx) = table.find_exact(header) {
        return Value::Uint(idx as u64);
    }
    let name_repr = match table.find_name(header) {
        Some(idx) => Value::Uint(idx as u64),
        None => Value::bytes(header.name.clone()),
    };
    let store = true;
    if store {
        table.push(header.clone());
    }
    Value::Array(vec![
        Value::Bool(store),
        name_repr,
        Value::bytes(header.value.clone()),
    ])
}

/// The outcome of attempting to decode one frame from the front of a buffer.
#[derive(Debug)]
pub enum DecodeError {
    /// `buf` is a strict prefix of a valid frame; read more and retry.
    NeedMore,
    /// The bytes are structurally invalid regardless of length.
    ParseError,
    /// A syntactically valid element tree did not have the shape required
    /// of a frame.
    FrameFormatError,
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::NeedMore => TransportError::InsufficientBytes,
            DecodeError::ParseError => TransportError::ParseError,
            DecodeError::FrameFormatError => TransportError::FrameFormatError,
        }
    }
}

/// One-shot decode: attempts to parse exactly one frame from the front of
/// `buf`, consuming header entries against `table` (the reader-side table).
/// Returns the frame and the number of bytes consumed.
pub fn decode(buf: &[u8], table: &mut HeaderTable) -> Result<(Frame, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::NeedMore);
    }
    let count = buf[0];
    if count != 3 && count != 4 {
        return Err(DecodeError::FrameFormatError);
    }
    if buf.len() < 1 + 8 + 8 {
        return Err(DecodeError::NeedMore);
    }
    let mut header_cursor = &buf[1..];
    let span = header_cursor.get_u64();
    let ty = header_cursor.get_u64();
    let mut offset = 1 + 8 + 8;

    let (args, args_len) = decode_value(&buf[offset..])?;
    let args = match args {
        Value::Array(_) => args,
        _ => return Err(DecodeError::FrameFormatError),
    };
    offset += args_len;

    let headers = if count == 4 {
        let (raw, headers_len) = decode_value(&buf[offset..])?;
        offset += headers_len;
        let entries = match raw {
            Value::Array(items) => items,
            _ => return Err(DecodeError::FrameFormatError),
        };
        Some(decode_headers(&entries, table)?)
    } else {
        None
    };

    Ok((
        Frame {
            span,
            ty,
            args,
            headers,
        },
        offset,
    ))
}

fn decode_value(buf: &[u8]) -> Result<(Value, usize), DecodeError> {
    Value::decode(buf).map_err(|e| match e {
        DecodeOutcome::NeedMore => DecodeError::NeedMore,
        DecodeOutcome::ParseError => DecodeError::ParseError,
    })
}

fn decode_headers(entries: &[Value], table: &mut HeaderTable) -> Result<Vec<Header>, DecodeError> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Value::Uint(idx) => {
                let header = table
                    .lookup(*idx as usize)
                    .ok_or(DecodeError::FrameFormatError)?
                    .clone();
                out.push(header);
            }
            Value::Array(tuple) => {
                if tuple.len() != 3 {
                    return Err(DecodeError::FrameFormatError);
                }
                let store = tuple[0].as_bool().ok_or(DecodeError::FrameFormatError)?;
                let name: Bytes = match &tuple[1] {
                    Value::Uint(idx) => table
                        .lookup(*idx as usize)
                        .ok_or(DecodeError::FrameFormatError)?
                        .name
                        .clone(),
                    Value::Bytes(raw) => raw.clone(),
                    _ => return Err(DecodeError::FrameFormatError),
                };
                let value = tuple[2]
                    .as_bytes()
                    .ok_or(DecodeError::FrameFormatError)?
                    .clone();
                let header = Header { name, value };
                if store {
                    table.push(header.clone());
                }
                out.push(header);
            }
            _ => return Err(DecodeError::FrameFormatError),
        }
    }
    Ok(out)
}

/// Accumulates bytes across reads and peels off complete frames, so a pull
/// loop can feed arbitrary chunk sizes without re-scanning from byte 0 on
/// every partial read (SPEC_FULL §2.1).
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            buf: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Attempts to pull one complete frame out of the accumulated buffer.
    /// Returns `Ok(None)` when more bytes are needed; the already-buffered
    /// prefix is retained for the next call.
    pub fn poll_frame(
        &mut self,
        table: &mut HeaderTable,
    ) -> Result<Option<Frame>, TransportError> {
        match decode(&self.buf, table) {
            Ok((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            Err(DecodeError::NeedMore) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
