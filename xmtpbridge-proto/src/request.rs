//! Relay requests as published on the bus channel.
//!
//! Publishers push a UTF-8 JSON object of the form
//! `{"ethereumAddress": "0x…", "message": "…"}`. There is no schema version
//! and no acknowledgment back to the publisher.

use serde::{Deserialize, Serialize};

/// Error type for request encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload was not a JSON object with the expected fields.
    #[error("malformed relay request: {0}")]
    Malformed(String),
    /// The request could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A single "send this text to this address" instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Ethereum address of the recipient, in any letter case.
    #[serde(rename = "ethereumAddress")]
    pub recipient_address: String,
    /// Message text to deliver.
    pub message: String,
}

impl RelayRequest {
    /// Creates a request for the given recipient and text.
    pub fn new(recipient_address: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recipient_address: recipient_address.into(),
            message: message.into(),
        }
    }
}

/// Decodes a bus payload into a [`RelayRequest`].
///
/// Unknown fields are ignored; both `ethereumAddress` and `message` must be
/// present and be strings.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the payload is not valid JSON or is
/// missing a required field.
pub fn decode(payload: &str) -> Result<RelayRequest, DecodeError> {
    serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Encodes a [`RelayRequest`] as the JSON text publishers put on the channel.
///
/// # Errors
///
/// Returns [`DecodeError::Serialization`] if serialization fails.
pub fn encode(request: &RelayRequest) -> Result<String, DecodeError> {
    serde_json::to_string(request).map_err(|e| DecodeError::Serialization(e.to_string()))
}
