//! Prekey bundle payloads.
//!
//! # Protocol Flow
//!
//! 1. Account uploads identity key, signed prekey and a batch of one-time
//!    prekeys (`UploadBundleRequest`)
//! 2. Peer fetches the bundle (`BundleResponse`), consuming one one-time
//!    prekey
//! 3. Account polls `PreKeyCountResponse` and replenishes with
//!    `UploadPreKeysRequest` when the pool runs low

use keyhold_core::{
    KeyId, OneTimePreKey, PreKeyBundle, PreKeyUpload, SignedPreKey, SignedPreKeyUpload,
    SkipReason, SkippedPreKey, UploadReport,
};
use serde::{Deserialize, Serialize};

use crate::codec::{WireError, decode_b64, encode_b64};

/// Signed prekey on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyWire {
    /// Caller-assigned id
    pub key_id: KeyId,
    /// Base64 public key (32 bytes decoded)
    pub public_key: String,
    /// Base64 signature (64 bytes decoded)
    pub signature: String,
}

impl SignedPreKeyWire {
    /// Undo base64. Lengths are checked later by the registry.
    pub fn decode(&self) -> Result<SignedPreKeyUpload, WireError> {
        Ok(SignedPreKeyUpload {
            key_id: self.key_id,
            public_key: decode_b64("signed_prekey.public_key", &self.public_key)?,
            signature: decode_b64("signed_prekey.signature", &self.signature)?,
        })
    }
}

impl From<&SignedPreKey> for SignedPreKeyWire {
    fn from(spk: &SignedPreKey) -> Self {
        Self {
            key_id: spk.key_id,
            public_key: encode_b64(spk.public_key.as_bytes()),
            signature: encode_b64(spk.signature.as_bytes()),
        }
    }
}

/// One-time prekey on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyWire {
    /// Caller-assigned id
    pub key_id: KeyId,
    /// Base64 public key (32 bytes decoded)
    pub public_key: String,
}

impl PreKeyWire {
    /// Undo base64.
    pub fn decode(&self) -> Result<PreKeyUpload, WireError> {
        Ok(PreKeyUpload {
            key_id: self.key_id,
            public_key: decode_b64("one_time_prekey.public_key", &self.public_key)?,
        })
    }
}

impl From<&OneTimePreKey> for PreKeyWire {
    fn from(opk: &OneTimePreKey) -> Self {
        Self { key_id: opk.key_id, public_key: encode_b64(opk.public_key.as_bytes()) }
    }
}

/// Decode a one-time prekey batch without failing on individual entries.
///
/// Entries with broken base64 are returned as skips so they end up in the
/// upload report next to the entries the registry rejects.
pub fn decode_pre_keys(batch: &[PreKeyWire]) -> (Vec<PreKeyUpload>, Vec<SkippedPreKey>) {
    let mut decoded = Vec::with_capacity(batch.len());
    let mut skipped = Vec::new();

    for wire in batch {
        match wire.decode() {
            Ok(upload) => decoded.push(upload),
            Err(e) => skipped.push(SkippedPreKey {
                key_id: wire.key_id,
                reason: SkipReason::Malformed(e.to_string()),
            }),
        }
    }

    (decoded, skipped)
}

/// Full bundle upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBundleRequest {
    /// Base64 identity key (32 bytes decoded)
    pub identity_key: String,
    /// Client registration id
    pub registration_id: u32,
    /// Signed prekey
    pub signed_pre_key: SignedPreKeyWire,
    /// One-time prekeys
    #[serde(default)]
    pub one_time_pre_keys: Vec<PreKeyWire>,
}

/// One-time prekey replenishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPreKeysRequest {
    /// One-time prekeys
    pub pre_keys: Vec<PreKeyWire>,
}

/// Signed prekey rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSignedPreKeyRequest {
    /// New or refreshed signed prekey
    pub signed_pre_key: SignedPreKeyWire,
}

/// Skipped batch entry on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPreKeyWire {
    /// Id from the submitted entry
    pub key_id: KeyId,
    /// Human-readable reason
    pub reason: String,
}

impl From<&SkippedPreKey> for SkippedPreKeyWire {
    fn from(skip: &SkippedPreKey) -> Self {
        let reason = match &skip.reason {
            SkipReason::Malformed(msg) => format!("malformed: {msg}"),
            SkipReason::DuplicateInBatch => "duplicate key_id in batch".to_string(),
            SkipReason::AlreadyStored => "key_id already stored".to_string(),
        };
        Self { key_id: skip.key_id, reason }
    }
}

/// Result of a prekey upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReportResponse {
    /// Ids newly stored
    pub stored: Vec<KeyId>,
    /// Entries not stored
    #[serde(default)]
    pub skipped: Vec<SkippedPreKeyWire>,
}

impl From<&UploadReport> for UploadReportResponse {
    fn from(report: &UploadReport) -> Self {
        Self {
            stored: report.stored.clone(),
            skipped: report.skipped.iter().map(SkippedPreKeyWire::from).collect(),
        }
    }
}

/// Bundle handed to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleResponse {
    /// Account the bundle belongs to
    pub account_id: u64,
    /// Base64 identity key
    pub identity_key: String,
    /// Client registration id
    pub registration_id: u32,
    /// Current signed prekey
    pub signed_pre_key: SignedPreKeyWire,
    /// Consumed one-time prekey, absent once the pool is exhausted
    pub one_time_pre_key: Option<PreKeyWire>,
}

impl From<&PreKeyBundle> for BundleResponse {
    fn from(bundle: &PreKeyBundle) -> Self {
        Self {
            account_id: bundle.account.get(),
            identity_key: encode_b64(bundle.identity_key.as_bytes()),
            registration_id: bundle.registration_id,
            signed_pre_key: SignedPreKeyWire::from(&bundle.signed_prekey),
            one_time_pre_key: bundle.one_time_prekey.as_ref().map(PreKeyWire::from),
        }
    }
}

/// Remaining one-time prekeys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyCountResponse {
    /// Unconsumed one-time prekeys
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use keyhold_core::{AccountId, PublicKey, Signature};

    use super::*;

    #[test]
    fn decode_pre_keys_keeps_going_past_bad_entries() {
        let batch = vec![
            PreKeyWire { key_id: 1, public_key: encode_b64(&[1; 32]) },
            PreKeyWire { key_id: 2, public_key: "%%%".to_string() },
            PreKeyWire { key_id: 3, public_key: encode_b64(&[3; 32]) },
        ];

        let (decoded, skipped) = decode_pre_keys(&batch);
        assert_eq!(decoded.len(), 2);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].key_id, 2);
    }

    #[test]
    fn bundle_response_without_one_time_prekey() {
        let bundle = PreKeyBundle {
            account: AccountId(5),
            identity_key: PublicKey::from_bytes([1; 32]),
            registration_id: 77,
            signed_prekey: SignedPreKey {
                key_id: 9,
                public_key: PublicKey::from_bytes([2; 32]),
                signature: Signature::from_bytes([3; 64]),
                created_at_secs: 0,
            },
            one_time_prekey: None,
        };

        let response = BundleResponse::from(&bundle);
        assert_eq!(response.account_id, 5);
        assert_eq!(response.signed_pre_key.key_id, 9);
        assert!(response.one_time_pre_key.is_none());
        assert_eq!(response.identity_key, encode_b64(&[1; 32]));
    }

    #[test]
    fn skipped_reasons_are_readable() {
        let wire = SkippedPreKeyWire::from(&SkippedPreKey {
            key_id: 4,
            reason: SkipReason::AlreadyStored,
        });
        assert_eq!(wire.reason, "key_id already stored");
    }
}
