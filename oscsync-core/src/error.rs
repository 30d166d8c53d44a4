//! Error types for datagram decoding and log records

use thiserror::Error;

/// Reasons an OSC datagram could not be decoded.
///
/// These never escape the decoder; they are rendered into the text of an
/// unknown [`OscPreview`](crate::osc::OscPreview).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A fixed-width field runs past the end of the packet
    #[error("{field} out of bounds")]
    OutOfBounds { field: &'static str },

    /// No NUL terminator after the given offset
    #[error("OSC string terminator not found")]
    MissingTerminator { offset: usize },

    /// Address does not start with '/'
    #[error("Not an OSC message address")]
    InvalidAddress,

    /// Type tag string does not start with ','
    #[error("Invalid OSC typetag")]
    InvalidTypeTags,

    /// Bundle shorter than marker plus time tag
    #[error("bundle too short: expected at least {expected} bytes, got {actual}")]
    BundleTooShort { expected: usize, actual: usize },

    /// Nested bundles deeper than the decoder allows
    #[error("bundle nesting deeper than {max}")]
    TooDeep { max: usize },
}

/// Errors decoding a single persisted event record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Line is not a JSON object with the required fields and types
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// Payload is not valid base64
    #[error("Invalid payload encoding: {0}")]
    InvalidPayload(String),

    /// Timestamp is NaN or infinite
    #[error("Timestamp is not finite")]
    NonFiniteTime,
}

impl From<serde_json::Error> for RecordError {
    fn from(e: serde_json::Error) -> Self {
        RecordError::Malformed(e.to_string())
    }
}

impl From<base64::DecodeError> for RecordError {
    fn from(e: base64::DecodeError) -> Self {
        RecordError::InvalidPayload(e.to_string())
    }
}
