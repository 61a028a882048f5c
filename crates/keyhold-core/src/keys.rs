//! Public key material with structural validation.
//!
//! Construction is the only validation point: a [`PublicKey`] is always 32
//! bytes and a [`Signature`] always 64 bytes. Whether the bytes form a valid
//! curve point or a valid signature is the client's problem.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::error::KeyError;

/// Size of an identity or prekey public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a signed-prekey signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Byte length did not match the expected size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} bytes, got {actual}")]
pub struct InvalidLength {
    /// Required length
    pub expected: usize,
    /// Length that was supplied
    pub actual: usize,
}

/// 32-byte public key (identity key, signed prekey or one-time prekey).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Validate a slice, naming `field` in the error.
    pub fn parse(field: &'static str, bytes: &[u8]) -> Result<Self, KeyError> {
        Self::try_from(bytes).map_err(|e| KeyError::invalid(field, e))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Copy out the raw bytes.
    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| InvalidLength { expected: PUBLIC_KEY_SIZE, actual: bytes.len() })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// 64-byte signature over a signed prekey, produced by the identity key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Validate a slice, naming `field` in the error.
    pub fn parse(field: &'static str, bytes: &[u8]) -> Result<Self, KeyError> {
        Self::try_from(bytes).map_err(|e| KeyError::invalid(field, e))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| InvalidLength { expected: SIGNATURE_SIZE, actual: bytes.len() })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

// Fixed-size arrays are stored as byte strings so CBOR stays compact and
// arrays above 32 elements need no special casing.
impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Self::try_from(buf.as_slice()).map_err(D::Error::custom)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Self::try_from(buf.as_slice()).map_err(D::Error::custom)
    }
}

/// Opaque sender-key distribution blob.
///
/// Its contents belong to the client protocol. The server only enforces that
/// it is non-empty and bounded in size.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyBlob(#[serde(with = "serde_bytes")] Vec<u8>);

impl SenderKeyBlob {
    /// Validate an uploaded blob against the configured size ceiling.
    pub fn parse(bytes: Vec<u8>, max_len: usize) -> Result<Self, KeyError> {
        if bytes.is_empty() {
            return Err(KeyError::invalid("sender_key", "empty"));
        }
        if bytes.len() > max_len {
            return Err(KeyError::invalid(
                "sender_key",
                format!("{} bytes exceeds limit of {max_len}", bytes.len()),
            ));
        }
        Ok(Self(bytes))
    }

    /// Borrow the blob.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take ownership of the blob.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Blob length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed blob.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SenderKeyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderKeyBlob({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_requires_exactly_32_bytes() {
        assert!(PublicKey::try_from([7u8; 32].as_slice()).is_ok());
        assert_eq!(
            PublicKey::try_from([7u8; 31].as_slice()),
            Err(InvalidLength { expected: 32, actual: 31 })
        );
        assert!(PublicKey::try_from([7u8; 33].as_slice()).is_err());
        assert!(PublicKey::try_from([].as_slice()).is_err());
    }

    #[test]
    fn signature_requires_exactly_64_bytes() {
        assert!(Signature::try_from([1u8; 64].as_slice()).is_ok());
        assert_eq!(
            Signature::try_from([1u8; 32].as_slice()),
            Err(InvalidLength { expected: 64, actual: 32 })
        );
    }

    #[test]
    fn parse_names_the_field() {
        let err = PublicKey::parse("identity_key", &[0u8; 5]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid key material in identity_key: expected 32 bytes, got 5"
        );
    }

    #[test]
    fn sender_key_blob_bounds() {
        assert!(SenderKeyBlob::parse(vec![], 16).is_err());
        assert!(SenderKeyBlob::parse(vec![0; 17], 16).is_err());
        let blob = SenderKeyBlob::parse(vec![9; 16], 16).unwrap();
        assert_eq!(blob.len(), 16);
    }

    #[test]
    fn debug_does_not_print_full_key() {
        let key = PublicKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{key:?}"), "PublicKey(abababab..)");
    }

    #[test]
    fn signature_survives_cbor() {
        let sig = Signature::from_bytes([3u8; 64]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&sig, &mut bytes).unwrap();
        let back: Signature = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(back, sig);
    }
}
