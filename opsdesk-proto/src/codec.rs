//! JSON text-frame codec for [`Envelope`]s.
//!
//! Frames are single JSON objects. Decoding is strict about required fields
//! and the `type` tag; extra fields are ignored.

use crate::envelope::Envelope;

/// Error returned when an inbound frame cannot be turned into an envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Invalid JSON, a missing required field, or an unknown `type`.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Error returned when an envelope cannot be serialized.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode envelope: {0}")]
pub struct EncodeError(String);

/// Encodes an [`Envelope`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`EncodeError`] if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, EncodeError> {
    serde_json::to_string(envelope).map_err(|e| EncodeError(e.to_string()))
}

/// Decodes a JSON text frame into an [`Envelope`].
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the frame is not a valid envelope.
pub fn decode(frame: &str) -> Result<Envelope, DecodeError> {
    serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decodes a binary frame carrying UTF-8 JSON.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the bytes are not UTF-8 or not a
/// valid envelope.
pub fn decode_bytes(frame: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode(text)
}
