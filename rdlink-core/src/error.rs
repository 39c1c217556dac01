//! Error types shared by every layer of the protocol.
//!
//! Errors fall into a few families:
//!
//! - protocol desync: an unknown handshake state or a serialization hash
//!   that differs from the counterpart's
//! - usage errors: conflicting trigger writes, null identifier misuse
//! - transient I/O reported by the transport beneath a wire
//! - decode problems while reading a payload
//!
//! Timeouts are not errors; waits report them as `false`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RdError>;

#[derive(Debug, Error)]
pub enum RdError {
    /// The null identifier was used where a real node id is required.
    #[error("id is null")]
    NullId,

    /// A trigger was already set to a different value.
    #[error("trigger already set with `{existing}`, but tried to rewrite it to `{attempted}`")]
    TriggerConflict { existing: String, attempted: String },

    /// The counterpart sent an extension state this side does not know.
    #[error("unsupported extension state code {0}")]
    UnknownExtState(i32),

    #[error("serialization hash of ext `{location}` doesn't match counterpart (local {local}, remote {remote}): maybe models were not regenerated?")]
    SerializationHashMismatch {
        location: String,
        local: i64,
        remote: i64,
    },

    /// The transport beneath a wire failed to deliver bytes.
    #[error("transport error: {0}")]
    Transport(String),

    /// The owning scope has already terminated.
    #[error("scope is terminated")]
    ScopeTerminated,

    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("invalid utf-8 in string payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// An interned id was referenced that this side never received.
    #[error("unknown intern id {0}")]
    UnknownInternId(i32),

    #[error("no marshaller registered for `{0}`")]
    NoMarshaller(&'static str),

    /// A value codec failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<rmp_serde::encode::Error> for RdError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RdError::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RdError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RdError::Codec(err.to_string())
    }
}

impl RdError {
    /// Whether this error means the two sides disagree about the protocol.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            RdError::UnknownExtState(_) | RdError::SerializationHashMismatch { .. }
        )
    }
}
