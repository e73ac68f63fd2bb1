//! `chamber`: the runtime core of a multiplexed, bidirectional RPC
//! framework — frame codec and header compression, session
//! multiplexing, and a single-partition Raft consensus actor.
//!
//! Mirrors the teacher's top-level crate split: `error` for the shared
//! taxonomy, `frame`/`header` for the wire format, `session`/`dispatch`
//! for the multiplexer, and `raft` for consensus, with `locator`
//! providing the naming indirection all three lean on.

pub mod dispatch;
pub mod error;
pub mod frame;
pub mod header;
pub mod locator;
pub mod raft;
pub mod session;
pub mod trace;
pub mod upstream;

pub use error::{Category, ErrorCode, Result};
pub use session::Session;
