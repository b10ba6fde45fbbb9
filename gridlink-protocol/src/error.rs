//! Protocol error types and stable status codes.

use thiserror::Error;

pub mod status {
    //! Stable negative status codes carried in message headers and error
    //! stacks. These are part of the wire contract and must not change
    //! between releases.

    pub const PACK_FORMAT_ERR: i32 = -21000;
    pub const UNRESOLVED_SCHEMA_ERR: i32 = -21100;
    pub const PACK_BOUNDS_ERR: i32 = -21200;
    pub const PACK_ALLOC_ERR: i32 = -21300;
    pub const HEADER_LEN_ERR: i32 = -22000;
    pub const TRANSPORT_ERR: i32 = -22100;
    pub const READ_TIMEOUT_ERR: i32 = -22110;
    pub const UNKNOWN_ENDPOINT_ERR: i32 = -23000;
    pub const CALL_INPUT_ERR: i32 = -23100;
}

/// Errors raised by instruction parsing, the pack engine and the framing
/// codec. Remote failures are not represented here: a negative status in an
/// otherwise well-formed reply is the call's ordinary result, not an error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed pack-instruction text.
    #[error("pack instruction format error: {0}")]
    Format(String),

    /// XML input did not carry the expected tag.
    #[error("XML tag error: expected {expected} tag <{name}>")]
    TagMismatch { name: String, expected: &'static str },

    /// Ran off the end of the wire input.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A type name matched none of the three registry tiers.
    #[error("cannot resolve type {0} in any pack table")]
    UnresolvedSchema(String),

    /// A decoded length reached or exceeded its declared maximum.
    #[error("length {len} exceeds declared maximum {max}")]
    Bounds { len: usize, max: usize },

    /// Output buffer growth would exceed the packed-size cap.
    #[error("packed output of {requested} bytes exceeds cap of {cap}")]
    Allocation { requested: usize, cap: usize },

    /// Header length prefix outside (0, MAX_HEADER_LEN]. Fatal framing
    /// corruption: the connection must be treated as ended, never retried.
    #[error("message header length {0} out of range")]
    HeaderLength(i64),

    /// A segment length in a decoded header was negative. Fatal, like
    /// `HeaderLength`.
    #[error("negative {name} length {len} in message header")]
    SegmentLength { name: &'static str, len: i32 },

    /// Decoded text was not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    Utf8(&'static str),

    /// A native value did not match the shape its schema requires.
    #[error("value mismatch for {field}: expected {expected}")]
    ValueMismatch { field: String, expected: &'static str },
}

impl ProtocolError {
    /// Maps the error to its stable wire status code.
    pub fn code(&self) -> i32 {
        match self {
            ProtocolError::Format(_)
            | ProtocolError::TagMismatch { .. }
            | ProtocolError::Truncated { .. }
            | ProtocolError::Utf8(_)
            | ProtocolError::ValueMismatch { .. } => status::PACK_FORMAT_ERR,
            ProtocolError::UnresolvedSchema(_) => status::UNRESOLVED_SCHEMA_ERR,
            ProtocolError::Bounds { .. } => status::PACK_BOUNDS_ERR,
            ProtocolError::Allocation { .. } => status::PACK_ALLOC_ERR,
            ProtocolError::HeaderLength(_) | ProtocolError::SegmentLength { .. } => {
                status::HEADER_LEN_ERR
            }
        }
    }

    /// Fatal framing corruption ends the connection and is never retried.
    pub fn is_fatal_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::HeaderLength(_) | ProtocolError::SegmentLength { .. }
        )
    }
}
