//! Client error types.

use fastdfs_protocol::{status_message, ProtocolError};
use std::sync::Arc;
use thiserror::Error;

/// Client errors.
///
/// Cloneable: a single fatal error rejects every outstanding task on a
/// connection, so the same error value must reach every caller.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("client already closed")]
    AlreadyClosed,

    #[error("client aborted")]
    Aborted,

    #[error("server error: {message} (status {code})")]
    Server { code: u8, message: &'static str },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl ClientError {
    /// Builds the typed error for a non-zero status byte.
    pub fn server(code: u8) -> Self {
        ClientError::Server {
            code,
            message: status_message(code),
        }
    }

    /// Returns whether this error terminates the whole connection, as
    /// opposed to failing a single request.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ClientError::Server { .. } | ClientError::MalformedResponse(_)
        )
    }
}
