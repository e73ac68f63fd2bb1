//! The self-describing typed-argument encoding used for `args` and for the
//! header array (spec §3 "args is an array of typed arguments", §6 wire
//! format). No schema compiler is in scope (spec §1), so each value carries
//! its own tag on the wire, in the spirit of the original's `msgpack::object`
//! (see `examples/original_source/include/cocaine/rpc/asio/decoder.hpp`)
//! without pulling in a msgpack dependency nothing else in the corpus uses.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TransportError;

const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_ARRAY: u8 = 6;

/// A typed value appearing inside a frame's `args` or `headers` element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Uint(u64),
    Int(i64),
    Bytes(Bytes),
    Array(Vec<Value>),
}

impl Value {
    pub fn bytes(b: impl Into<Bytes>) -> Value {
        Value::Bytes(b.into())
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Appends the wire encoding of this value to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Value::Nil => out.put_u8(TAG_NIL),
            Value::Bool(false) => out.put_u8(TAG_FALSE),
            Value::Bool(true) => out.put_u8(TAG_TRUE),
            Value::Uint(v) => {
                out.put_u8(TAG_UINT);
                out.put_u64(*v);
            }
            Value::Int(v) => {
                out.put_u8(TAG_INT);
                out.put_i64(*v);
            }
            Value::Bytes(b) => {
                out.put_u8(TAG_BYTES);
                out.put_u32(b.len() as u32);
                out.put_slice(b);
            }
            Value::Array(items) => {
                out.put_u8(TAG_ARRAY);
                out.put_u32(items.len() as u32);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Decodes a single value starting at `buf[0..]`, returning the value
    /// and the number of bytes consumed, or `Err(None)` if `buf` is a
    /// strict prefix of a valid encoding (the caller should read more),
    /// or `Err(Some(ParseError))` if the bytes are structurally invalid.
    pub fn decode(buf: &[u8]) -> Result<(Value, usize), DecodeOutcome> {
        let mut cursor = buf;
        let total = buf.len();
        let value = decode_inner(&mut cursor)?;
        let consumed = total - cursor.len();
        Ok((value, consumed))
    }
}

/// Internal signal distinguishing "need more bytes" from "malformed".
#[derive(Debug)]
pub enum DecodeOutcome {
    NeedMore,
    ParseError,
}

impl From<DecodeOutcome> for TransportError {
    fn from(o: DecodeOutcome) -> Self {
        match o {
            DecodeOutcome::NeedMore => TransportError::InsufficientBytes,
            DecodeOutcome::ParseError => TransportError::ParseError,
        }
    }
}

fn decode_inner(cursor: &mut &[u8]) -> Result<Value, DecodeOutcome> {
    if cursor.is_empty() {
        return Err(DecodeOutcome::NeedMore);
    }
    let tag = cursor[0];
    *cursor = &cursor[1..];
    match tag {
        TAG_NIL => Ok(Value::Nil),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_UINT => {
            if cursor.len() < 8 {
                return Err(DecodeOutcome::NeedMore);
            }
            Ok(Value::Uint(cursor.get_u64()))
        }
        TAG_INT => {
            if cursor.len() < 8 {
                return Err(DecodeOutcome::NeedMore);
            }
            Ok(Value::Int(cursor.get_i64()))
        }
        TAG_BYTES => {
            if cursor.len() < 4 {
                return Err(DecodeOutcome::NeedMore);
            }
            let len = cursor.get_u32() as usize;
            if cursor.len() < len {
                return Err(DecodeOutcome::NeedMore);
            }
            let bytes = Bytes::copy_from_slice(&cursor[..len]);
            *cursor = &cursor[len..];
            Ok(Value::Bytes(bytes))
        }
        TAG_ARRAY => {
            if cursor.len() < 4 {
                return Err(DecodeOutcome::NeedMore);
            }
            let count = cursor.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(decode_inner(cursor)?);
            }
            Ok(Value::Array(items))
        }
        _ => Err(DecodeOutcome::ParseError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let mut buf = BytesMut::new();
        v.encode(&mut buf);
        let (decoded, consumed) = Value::decode(&buf).expect("decode");
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(Value::Nil);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Uint(u64::MAX));
        roundtrip(Value::Int(-42));
        roundtrip(Value::bytes(&b"hello"[..]));
    }

    #[test]
    fn roundtrips_nested_array() {
        roundtrip(Value::Array(vec![
            Value::Uint(1),
            Value::bytes(&b"x"[..]),
            Value::Array(vec![Value::Nil, Value::Bool(true)]),
        ]));
    }

    #[test]
    fn truncated_buffer_is_need_more() {
        let mut buf = BytesMut::new();
        Value::bytes(&b"hello"[..]).encode(&mut buf);
        let short = &buf[..buf.len() - 2];
        match Value::decode(short) {
            Err(DecodeOutcome::NeedMore) => {}
            other => panic!("expected NeedMore, got {:?}", other.map(|(v, _)| v)),
        }
    }

    #[test]
    fn unknown_tag_is_parse_error() {
        let buf = [0xEEu8];
        match Value::decode(&buf) {
            Err(DecodeOutcome::ParseError) => {}
            other => panic!("expected ParseError, got {:?}", other.map(|(v, _)| v)),
        }
    }
}
