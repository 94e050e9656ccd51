//! Result decoding errors

use thiserror::Error;

/// Errors raised while decoding result payloads.
///
/// Malformed individual fields never surface here; they convert to
/// [`Field::Null`](crate::Field::Null). Only a payload that cannot be read as a
/// results page at all is an error.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Invalid results payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
