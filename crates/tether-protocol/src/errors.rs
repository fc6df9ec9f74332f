//! Frame decoding errors.

use tether_core::SyncError;
use thiserror::Error;

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The object has no string `type` field.
    #[error("frame has no type")]
    MissingType,

    /// A known frame type carried ill-typed fields.
    #[error("invalid `{frame_type}` frame: {source}")]
    InvalidPayload {
        /// The frame's `type`.
        frame_type: String,
        /// Field-level decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// An envelope field had the wrong type.
    #[error("invalid envelope field `{field}`")]
    InvalidEnvelope {
        /// Offending field name.
        field: &'static str,
    },
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::protocol(err.to_string())
    }
}
