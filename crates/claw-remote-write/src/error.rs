//! Error types for the claw-remote-write crate.

use thiserror::Error;

/// Errors that can occur while building, encoding or decoding remote-write
/// messages.
///
/// Exposition parsing has no error variant: malformed lines are dropped.
#[derive(Debug, Error)]
pub enum RemoteWriteError {
    /// The write request does not conform to the remote-write schema.
    #[error("schema error: {reason}")]
    Schema {
        /// The reason the message was rejected.
        reason: String,
    },

    /// The payload could not be decoded as a `WriteRequest`.
    #[error("decode error: {reason}")]
    Decode {
        /// The reason decoding failed.
        reason: String,
    },

    /// Snappy compression or decompression failed.
    #[error("compression error: {reason}")]
    Compression {
        /// The reason the codec failed.
        reason: String,
    },
}

impl RemoteWriteError {
    /// Creates a `Schema` error with the given reason.
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::Schema {
            reason: reason.into(),
        }
    }
}

impl From<prost::DecodeError> for RemoteWriteError {
    fn from(err: prost::DecodeError) -> Self {
        Self::Decode {
            reason: err.to_string(),
        }
    }
}

impl From<snap::Error> for RemoteWriteError {
    fn from(err: snap::Error) -> Self {
        Self::Compression {
            reason: err.to_string(),
        }
    }
}

/// Result type for remote-write operations.
pub type Result<T> = std::result::Result<T, RemoteWriteError>;
