//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or parsing protocol payloads.
///
/// Cloneable so the client can fail every outstanding request with the
/// same fatal error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("truncated header: got {got} bytes, expected 10")]
    TruncatedHeader { got: usize },

    #[error("truncated {record} record: {field} out of bounds at offset {offset}")]
    TruncatedRecord {
        record: &'static str,
        field: &'static str,
        offset: usize,
    },

    #[error("unexpected body length {got}, expected {expected}")]
    UnexpectedBodyLength { got: u64, expected: u64 },

    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// Conventional meaning of a non-zero status byte.
///
/// FastDFS reuses errno values for its status codes; the mapping covers
/// the codes trackers and storage nodes actually send.
pub fn status_message(status: u8) -> &'static str {
    match status {
        2 => "file or group not found",
        9 => "bad file descriptor on server",
        13 => "permission denied",
        16 => "server busy",
        17 => "file already exists",
        22 => "invalid argument",
        28 => "no space left on storage server",
        _ => "server error",
    }
}
