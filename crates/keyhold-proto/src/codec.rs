//! Base64 codec for binary fields.

use base64::prelude::*;
use keyhold_core::KeyError;
use thiserror::Error;

/// Errors decoding a wire value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Field was not valid standard base64
    #[error("invalid base64 in {field}: {reason}")]
    Base64 {
        /// Field name
        field: &'static str,
        /// Decoder message
        reason: String,
    },
}

impl From<WireError> for KeyError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Base64 { field, reason } => Self::InvalidKeyMaterial { field, reason },
        }
    }
}

/// Encode bytes as standard padded base64.
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode a standard padded base64 string, naming `field` on failure.
pub fn decode_b64(field: &'static str, value: &str) -> Result<Vec<u8>, WireError> {
    BASE64_STANDARD
        .decode(value)
        .map_err(|e| WireError::Base64 { field, reason: e.to_string() })
}
