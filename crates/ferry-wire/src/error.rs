//! Transport-level errors and their mapping onto wire status codes.

use ferry_types::error::{CODE_BAD_MESSAGE, CODE_CONN_CLOSED, CODE_WRITE_FAILED};
use ferry_types::Rerror;
use thiserror::Error;

/// Errors from the framing and transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Malformed frame: {0}")]
    BadFrame(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<WireError> for Rerror {
    fn from(err: WireError) -> Self {
        let code = match &err {
            WireError::ConnectionClosed => CODE_CONN_CLOSED,
            WireError::Json(_) | WireError::BadFrame(_) | WireError::FrameTooLarge { .. } => {
                CODE_BAD_MESSAGE
            }
            WireError::Io(_) | WireError::Transport(_) => CODE_WRITE_FAILED,
        };
        Rerror::from_code(code, err.to_string())
    }
}
