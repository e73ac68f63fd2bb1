//! The categorical `(category, code)` error taxonomy described in spec §7.
//!
//! Every error that can cross a wire boundary (a `revoke` control message, an
//! `UncaughtError` detach, a Raft RPC failure) is representable as an
//! [`ErrorCode`] — a small integer category plus a signed value, stable for
//! the lifetime of the process. Internally, modules use ordinary
//! `thiserror` enums (`TransportError`, `DispatchError`, ...); each one
//! converts `Into<ErrorCode>` so it can be handed to `discard` or put on the
//! wire without inventing a parallel "error string" contract.

use std::fmt;

/// Stable, process-wide category ids, registered once at startup the way
/// the original C++ implementation registers `std::error_category`
/// pointers behind a numeric key (see spec §9 "Global error-category
/// registration"). Re-architected here as a plain enum with a fixed
/// numeric mapping for wire serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Category {
    System = 0,
    Generic = 1,
    Transport = 2,
    Protocol = 3,
    Dispatch = 4,
    Repository = 5,
    Security = 6,
    Locator = 7,
    Raft = 8,
    Unknown = 0xFF,
}

impl Category {
    pub fn from_wire(id: u32) -> Category {
        match id {
            0 => Category::System,
            1 => Category::Generic,
            2 => Category::Transport,
            3 => Category::Protocol,
            4 => Category::Dispatch,
            5 => Category::Repository,
            6 => Category::Security,
            7 => Category::Locator,
            8 => Category::Raft,
            _ => Category::Unknown,
        }
    }
}

/// A `(category_id, value)` pair, exactly the shape spec §6 requires for
/// `control::revoke`'s `error_code` argument and for any error surfaced
/// across the session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub category: Category,
    pub value: i32,
}

impl ErrorCode {
    pub fn new(category: Category, value: i32) -> Self {
        ErrorCode { category, value }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {})", self.category, self.value)
    }
}

/// Transport-category errors (spec §7): raised while turning bytes into
/// frames.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("frame did not have the shape required of a frame")]
    FrameFormatError,
    #[error("header compression error: {0}")]
    HpackError(String),
    #[error("buffer is a strict prefix of a valid frame")]
    InsufficientBytes,
    #[error("bytes are structurally invalid regardless of length")]
    ParseError,
}

impl From<&TransportError> for ErrorCode {
    fn from(e: &TransportError) -> Self {
        let value = match e {
            TransportError::FrameFormatError => 1,
            TransportError::HpackError(_) => 2,
            TransportError::InsufficientBytes => 3,
            TransportError::ParseError => 4,
        };
        ErrorCode::new(Category::Transport, value)
    }
}

/// Protocol-category errors (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("upstream has already been closed")]
    ClosedUpstream,
}

impl From<&ProtocolError> for ErrorCode {
    fn from(_: &ProtocolError) -> Self {
        ErrorCode::new(Category::Protocol, 1)
    }
}

/// Dispatch-category errors (spec §7): these are the ones that flow through
/// `discard(ec)` and through `control::revoke`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("a dispatch with this name is already bound")]
    DuplicateSlot,
    #[error("invalid argument for message")]
    InvalidArgument,
    #[error("session is not connected")]
    NotConnected,
    #[error("channel id has been revoked")]
    RevokedChannel,
    #[error("no slot registered for message id")]
    SlotNotFound,
    #[error("dispatch has no bound continuation")]
    UnboundDispatch,
    #[error("uncaught error in dispatch: {0}")]
    UncaughtError(String),
}

impl From<&DispatchError> for ErrorCode {
    fn from(e: &DispatchError) -> Self {
        let value = match e {
            DispatchError::DuplicateSlot => 1,
            DispatchError::InvalidArgument => 2,
            DispatchError::NotConnected => 3,
            DispatchError::RevokedChannel => 4,
            DispatchError::SlotNotFound => 5,
            DispatchError::UnboundDispatch => 6,
            DispatchError::UncaughtError(_) => 7,
        };
        ErrorCode::new(Category::Dispatch, value)
    }
}

/// Locator-category errors (spec §6/§7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocatorError {
    #[error("service is not available")]
    ServiceNotAvailable,
    #[error("routing storage error: {0}")]
    RoutingStorageError(String),
    #[error("missing version error")]
    MissingVersionError,
    #[error("duplicate service registration at gateway")]
    GatewayDuplicateService,
    #[error("missing service registration at gateway")]
    GatewayMissingService,
}

impl From<&LocatorError> for ErrorCode {
    fn from(e: &LocatorError) -> Self {
        let value = match e {
            LocatorError::ServiceNotAvailable => 1,
            LocatorError::RoutingStorageError(_) => 2,
            LocatorError::MissingVersionError => 3,
            LocatorError::GatewayDuplicateService => 4,
            LocatorError::GatewayMissingService => 5,
        };
        ErrorCode::new(Category::Locator, value)
    }
}

/// Security-category errors (spec §7). None of the core subsystems raise
/// these directly; they are part of the stable taxonomy so that a
/// `revoke`'s error code originating in an authorization layer outside the
/// core still round-trips through the same wire representation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecurityError {
    #[error("token not found")]
    TokenNotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("permission denied")]
    PermissionDenied,
    #[error("permissions changed")]
    PermissionsChanged,
    #[error("invalid ACL framing")]
    InvalidAclFraming,
}

impl From<&SecurityError> for ErrorCode {
    fn from(e: &SecurityError) -> Self {
        let value = match e {
            SecurityError::TokenNotFound => 1,
            SecurityError::Unauthorized => 2,
            SecurityError::PermissionDenied => 3,
            SecurityError::PermissionsChanged => 4,
            SecurityError::InvalidAclFraming => 5,
        };
        ErrorCode::new(Category::Security, value)
    }
}

/// Raft-category errors (spec §7): completion errors delivered to a
/// client call's bound continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RaftError {
    #[error("this node is not the current leader")]
    NotLeader,
    #[error("the outcome of the request is unknown (leadership changed before commit)")]
    Unknown,
}

impl From<&RaftError> for ErrorCode {
    fn from(e: &RaftError) -> Self {
        let value = match e {
            RaftError::NotLeader => 1,
            RaftError::Unknown => 2,
        };
        ErrorCode::new(Category::Raft, value)
    }
}

/// Umbrella error type returned by fallible core operations that are not
/// otherwise tied to one category (mirrors the teacher's use of
/// `anyhow::Error` at the edges of the storage/network traits).
pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrips_through_wire_ids() {
        let ec = ErrorCode::from(&DispatchError::RevokedChannel);
        assert_eq!(ec.category, Category::Dispatch);
        assert_eq!(Category::from_wire(4), Category::Dispatch);
    }

    #[test]
    fn unknown_category_id_maps_to_unknown() {
        assert_eq!(Category::from_wire(200), Category::Unknown);
    }
}
