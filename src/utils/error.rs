//! Error types and handling
//!
//! Crate-wide error type. Each subsystem keeps its own error enum and
//! converts into `StreamError` at the edges.

use crate::capture::CaptureError;
use crate::memory::PoolError;
use crate::receiver::DecodeError;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Pipeline shut down")]
    Shutdown,
}

/// Serializable error summary, attached to session events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&StreamError> for ErrorResponse {
    fn from(error: &StreamError) -> Self {
        let code = match error {
            StreamError::Io(_) => "IO_ERROR",
            StreamError::Serialization(_) => "SERIALIZATION_ERROR",
            StreamError::Config(_) => "CONFIG_ERROR",
            StreamError::Capture(_) => "CAPTURE_ERROR",
            StreamError::Transport(_) => "TRANSPORT_ERROR",
            StreamError::Pool(_) => "POOL_ERROR",
            StreamError::Decode(_) => "DECODE_ERROR",
            StreamError::Wav(_) => "WAV_ERROR",
            StreamError::Shutdown => "SHUTDOWN",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using StreamError
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let err = StreamError::Config("chunk size is fractional".to_string());
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "CONFIG_ERROR");
        assert!(response.message.contains("fractional"));

        let err = StreamError::from(CaptureError::Timeout(1000));
        assert_eq!(ErrorResponse::from(&err).code, "CAPTURE_ERROR");
    }
}
