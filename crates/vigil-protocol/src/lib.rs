//! Vigil Protocol -- framing codec, envelope types, error codes.
//!
//! TCP between agent and clients. 4-byte big-endian length prefix +
//! UTF-8 serde JSON envelope, one envelope per frame.

pub mod codec;
pub mod envelope;

pub use codec::FrameCodec;
pub use envelope::{
    make_error, make_hello, make_request, make_response, parse_envelope, Envelope, EnvelopeError,
    EnvelopeType, HelloLimits, Meta,
};

use serde::{Deserialize, Serialize};

/// Protocol version stamped into every envelope.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default maximum frame size: 256 KiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Framing errors are unrecoverable for the connection; the decoder
    /// cannot resynchronise once a declared length is untrusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. } | ProtocolError::Io(_))
    }
}

/// Closed wire error-code enumeration. Handlers and the pipeline map every
/// internal failure into one of these; nothing else reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    AuthRequired,
    InvalidToken,
    TokenExpired,
    Unauthorized,
    Forbidden,
    UnknownAction,
    PayloadTooLarge,
    RateLimited,
    InternalError,
    Connection,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Connection => "CONNECTION",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
