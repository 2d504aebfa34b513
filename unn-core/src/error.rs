//! Domain error enums.
//!
//! Each component gets its own closed `thiserror` enum rather than one
//! catch-all — callers match on these to decide whether a failure is a
//! protocol error (reply and keep the stream open), an authorization
//! error (reply, don't mutate state), or something fatal.

use thiserror::Error;

/// Errors from name validation, shared by usernames and room names (§4.2,
/// both use the same 3-20 character `[A-Za-z0-9_-]` rule).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must be between 3 and 20 characters")]
    BadLength,
    #[error("name may only contain letters, digits, '_' and '-'")]
    BadCharacters,
}

/// Errors from `IdentityRegistry` operations (§4.2).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] ValidationError),
    #[error("username already taken by {taken_by}")]
    UsernameTaken { taken_by: String },
    #[error("username is registered under a different platform identity")]
    PlatformMismatch,
}

/// Errors from `RoomRegistry` operations (§4.6, S3).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("invalid room name: {0}")]
    InvalidRoomName(#[from] ValidationError),
    #[error("Room name '{room_name}' is already taken by another user.")]
    RoomNameTaken { room_name: String },
    #[error("room '{0}' is not currently live")]
    RoomOffline(String),
    #[error("room '{0}' was never registered")]
    RoomNotFound(String),
}

/// Errors from the wire envelope codec (§4.1).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed JSON frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    #[error("i/o error reading frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream closed mid-frame")]
    Truncated,
}

/// Errors from the identity verifier (§4.3).
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("platform host unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("platform returned status {0}")]
    PlatformStatusError(u16),
}

/// Errors from registry persistence (§6). Per §7, a persistence error is
/// logged but does not fail the in-memory operation that triggered it —
/// this type exists so the write path has somewhere to report the
/// failure without unwinding the caller.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to persist registry to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
