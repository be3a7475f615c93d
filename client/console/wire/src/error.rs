//! Envelope codec error types.

use thiserror::Error;

/// Errors produced while decoding an inbound text frame.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Frame is not valid JSON
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object
    #[error("frame is not a json object")]
    NotAnObject,

    /// Frame is missing the mandatory `type` field
    #[error("envelope missing \"type\" field")]
    MissingType,
}
