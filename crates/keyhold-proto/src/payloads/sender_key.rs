//! Sender-key payloads.
//!
//! # Protocol Flow
//!
//! 1. Member uploads its sender key for a channel (`UploadSenderKeyRequest`)
//! 2. Other members fetch it (`SenderKeyResponse`) to bootstrap their
//!    receiving ratchet
//! 3. On any membership change the channel is invalidated
//!    (`InvalidationResponse`); members poll `ChannelKeyStatusResponse` until
//!    `ready` before sending again

use keyhold_core::{
    ChannelKeyStatus, DistributionId, Invalidation, MemberKeyStatus, Role, SenderKeyRecord,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{WireError, decode_b64, encode_b64};

/// Sender-key upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSenderKeyRequest {
    /// Client-chosen epoch identifier
    pub distribution_id: Uuid,
    /// Base64 opaque sender-key blob
    pub sender_key: String,
}

impl UploadSenderKeyRequest {
    /// Undo base64.
    pub fn decode(&self) -> Result<(DistributionId, Vec<u8>), WireError> {
        Ok((DistributionId::new(self.distribution_id), decode_b64("sender_key", &self.sender_key)?))
    }
}

/// A member's sender key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyResponse {
    /// Owning member
    pub user_id: u64,
    /// Epoch identifier
    pub distribution_id: Uuid,
    /// Base64 opaque blob
    pub sender_key: String,
    /// Monotonic iteration
    pub iteration: u64,
    /// Unix seconds of the upload
    pub created_at_secs: u64,
}

impl From<&SenderKeyRecord> for SenderKeyResponse {
    fn from(record: &SenderKeyRecord) -> Self {
        Self {
            user_id: record.user.get(),
            distribution_id: *record.distribution_id.as_uuid(),
            sender_key: encode_b64(record.sender_key.as_bytes()),
            iteration: record.iteration,
            created_at_secs: record.created_at_secs,
        }
    }
}

/// All sender keys of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeysResponse {
    /// One entry per member that currently holds a key
    pub keys: Vec<SenderKeyResponse>,
}

impl From<&[SenderKeyRecord]> for SenderKeysResponse {
    fn from(records: &[SenderKeyRecord]) -> Self {
        Self { keys: records.iter().map(SenderKeyResponse::from).collect() }
    }
}

/// Result of a channel invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationResponse {
    /// Sender keys deleted
    pub removed: usize,
    /// Rotation counter after the invalidation
    pub rotation: u64,
}

impl From<&Invalidation> for InvalidationResponse {
    fn from(inv: &Invalidation) -> Self {
        Self { removed: inv.removed, rotation: inv.mark.rotation }
    }
}

/// Per-member key readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberKeyStatusWire {
    /// Member
    pub user_id: u64,
    /// Member role
    pub role: Role,
    /// Uploaded since the last rotation
    pub has_key: bool,
    /// Current iteration, if keyed
    pub iteration: Option<u64>,
    /// Current distribution id, if keyed
    pub distribution_id: Option<Uuid>,
}

impl From<&MemberKeyStatus> for MemberKeyStatusWire {
    fn from(status: &MemberKeyStatus) -> Self {
        Self {
            user_id: status.user.get(),
            role: status.role,
            has_key: status.has_key,
            iteration: status.iteration,
            distribution_id: status.distribution_id.map(|d| *d.as_uuid()),
        }
    }
}

/// Channel rotation progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelKeyStatusResponse {
    /// Number of rotations so far (0 if never invalidated)
    pub rotation: u64,
    /// Unix seconds of the latest invalidation
    pub invalidated_at_secs: Option<u64>,
    /// Every current member holds a key
    pub ready: bool,
    /// Per-member detail
    pub members: Vec<MemberKeyStatusWire>,
}

impl From<&ChannelKeyStatus> for ChannelKeyStatusResponse {
    fn from(status: &ChannelKeyStatus) -> Self {
        Self {
            rotation: status.rotation.map_or(0, |m| m.rotation),
            invalidated_at_secs: status.rotation.map(|m| m.invalidated_at_secs),
            ready: status.is_ready(),
            members: status.members.iter().map(MemberKeyStatusWire::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use keyhold_core::{AccountId, ChannelId, RotationMark, SenderKeyBlob};

    use super::*;

    #[test]
    fn upload_decodes_blob() {
        let request = UploadSenderKeyRequest {
            distribution_id: Uuid::from_u128(3),
            sender_key: encode_b64(b"blob"),
        };
        let (distribution_id, blob) = request.decode().unwrap();
        assert_eq!(distribution_id, DistributionId::new(Uuid::from_u128(3)));
        assert_eq!(blob, b"blob");
    }

    #[test]
    fn record_encodes_blob() {
        let record = SenderKeyRecord {
            channel: ChannelId(1),
            user: AccountId(2),
            distribution_id: DistributionId::new(Uuid::from_u128(4)),
            sender_key: SenderKeyBlob::parse(b"blob".to_vec(), 64).unwrap(),
            iteration: 3,
            created_at_secs: 10,
        };
        let wire = SenderKeyResponse::from(&record);
        assert_eq!(wire.sender_key, encode_b64(b"blob"));
        assert_eq!(wire.iteration, 3);
        assert_eq!(wire.user_id, 2);
    }

    #[test]
    fn status_reports_readiness() {
        let status = ChannelKeyStatus {
            channel: ChannelId(1),
            rotation: Some(RotationMark { rotation: 2, invalidated_at_secs: 50 }),
            members: vec![
                MemberKeyStatus {
                    user: AccountId(1),
                    role: Role::Owner,
                    has_key: true,
                    iteration: Some(4),
                    distribution_id: None,
                },
                MemberKeyStatus {
                    user: AccountId(2),
                    role: Role::Member,
                    has_key: false,
                    iteration: None,
                    distribution_id: None,
                },
            ],
        };
        let wire = ChannelKeyStatusResponse::from(&status);
        assert_eq!(wire.rotation, 2);
        assert_eq!(wire.invalidated_at_secs, Some(50));
        assert!(!wire.ready);
        assert_eq!(wire.members.len(), 2);
    }
}
