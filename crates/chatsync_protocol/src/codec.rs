//! CBOR encoding helpers.
//!
//! All protocol messages cross the wire as CBOR. The helpers here wrap
//! `ciborium` so callers deal in one error type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from CBOR encoding or decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be encoded.
    #[error("cbor encode failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the requested type.
    #[error("cbor decode failed: {0}")]
    Decode(String),
}

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
