//! Stored records and upload inputs.
//!
//! Upload inputs ([`SignedPreKeyUpload`], [`PreKeyUpload`]) carry raw byte
//! vectors exactly as received. They become records only through validation,
//! so a record in storage is always structurally well-formed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::KeyError,
    ids::{AccountId, ChannelId, DistributionId, KeyId, UserId},
    keys::{PublicKey, SenderKeyBlob, Signature},
    membership::Role,
};

/// Long-term identity of an account. At most one per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Owning account
    pub account: AccountId,
    /// Long-term identity public key
    pub identity_key: PublicKey,
    /// Client registration id
    pub registration_id: u32,
    /// Unix seconds of the last upload
    pub updated_at_secs: u64,
}

/// Medium-lifetime prekey signed by the identity key.
///
/// Several may be retained per account; only the newest is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKey {
    /// Caller-assigned id
    pub key_id: KeyId,
    /// Prekey public key
    pub public_key: PublicKey,
    /// Identity-key signature over `public_key`
    pub signature: Signature,
    /// Unix seconds when this row was (re)submitted
    pub created_at_secs: u64,
}

/// Single-use prekey. Deleted on consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKey {
    /// Caller-assigned id, unique per account
    pub key_id: KeyId,
    /// Prekey public key
    pub public_key: PublicKey,
}

/// Everything a peer needs to bootstrap an X3DH session with `account`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Account the bundle belongs to
    pub account: AccountId,
    /// Identity public key
    pub identity_key: PublicKey,
    /// Client registration id
    pub registration_id: u32,
    /// Current (newest) signed prekey
    pub signed_prekey: SignedPreKey,
    /// Consumed one-time prekey, `None` once the pool is exhausted
    pub one_time_prekey: Option<OneTimePreKey>,
}

/// Sender key of one member in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    /// Channel
    pub channel: ChannelId,
    /// Member who owns the key
    pub user: UserId,
    /// Client-chosen epoch identifier
    pub distribution_id: DistributionId,
    /// Opaque client-protocol blob
    pub sender_key: SenderKeyBlob,
    /// Never-reused, strictly increasing per (channel, user)
    pub iteration: u64,
    /// Unix seconds of this upload
    pub created_at_secs: u64,
}

/// Rotation bookkeeping for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationMark {
    /// Number of invalidations so far
    pub rotation: u64,
    /// Unix seconds of the latest invalidation
    pub invalidated_at_secs: u64,
}

/// Outcome of a channel invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    /// Sender keys deleted
    pub removed: usize,
    /// Rotation mark after the invalidation
    pub mark: RotationMark,
}

/// Per-member view of a channel's key readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKeyStatus {
    /// Member
    pub user: UserId,
    /// Member's role
    pub role: Role,
    /// Whether the member has uploaded a sender key since the last rotation
    pub has_key: bool,
    /// Iteration of the current key, if any
    pub iteration: Option<u64>,
    /// Distribution id of the current key, if any
    pub distribution_id: Option<DistributionId>,
}

/// Rotation progress of a channel.
///
/// A channel is safe to send on only when every current member has
/// re-uploaded a sender key after the latest invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKeyStatus {
    /// Channel
    pub channel: ChannelId,
    /// Latest rotation, `None` if the channel was never invalidated
    pub rotation: Option<RotationMark>,
    /// One entry per current member, ordered by user id
    pub members: Vec<MemberKeyStatus>,
}

impl ChannelKeyStatus {
    /// Every current member holds a sender key.
    pub fn is_ready(&self) -> bool {
        self.members.iter().all(|m| m.has_key)
    }

    /// Members that still need to upload.
    pub fn pending(&self) -> impl Iterator<Item = UserId> + '_ {
        self.members.iter().filter(|m| !m.has_key).map(|m| m.user)
    }
}

/// Signed prekey as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPreKeyUpload {
    /// Caller-assigned id
    pub key_id: KeyId,
    /// Raw public key bytes
    pub public_key: Vec<u8>,
    /// Raw signature bytes
    pub signature: Vec<u8>,
}

impl SignedPreKeyUpload {
    /// Validate lengths and stamp the creation time.
    pub fn validate(&self, now_secs: u64) -> Result<SignedPreKey, KeyError> {
        Ok(SignedPreKey {
            key_id: self.key_id,
            public_key: PublicKey::parse("signed_prekey.public_key", &self.public_key)?,
            signature: Signature::parse("signed_prekey.signature", &self.signature)?,
            created_at_secs: now_secs,
        })
    }
}

/// One-time prekey as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyUpload {
    /// Caller-assigned id
    pub key_id: KeyId,
    /// Raw public key bytes
    pub public_key: Vec<u8>,
}

/// Why a one-time prekey in a batch was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Failed structural validation
    Malformed(String),
    /// Same `key_id` appeared earlier in the batch
    DuplicateInBatch,
    /// `key_id` already stored for this account
    AlreadyStored,
}

/// A one-time prekey that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPreKey {
    /// Id from the submitted entry
    pub key_id: KeyId,
    /// Reason it was skipped
    pub reason: SkipReason,
}

/// Outcome of a one-time prekey batch upload.
///
/// Skips never fail the upload; this report exists for client diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Ids newly stored, in submission order
    pub stored: Vec<KeyId>,
    /// Entries that were skipped
    pub skipped: Vec<SkippedPreKey>,
}

impl UploadReport {
    /// Whether every submitted entry was stored.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Append skips detected outside the registry (e.g. undecodable wire
    /// entries).
    pub fn extend_skipped(&mut self, skipped: impl IntoIterator<Item = SkippedPreKey>) {
        self.skipped.extend(skipped);
    }
}

/// Validate a batch entry by entry.
///
/// Malformed entries and repeated ids are reported, not rejected. The first
/// well-formed occurrence of an id wins.
pub fn partition_pre_keys(batch: &[PreKeyUpload]) -> (Vec<OneTimePreKey>, Vec<SkippedPreKey>) {
    let mut seen = HashSet::with_capacity(batch.len());
    let mut valid = Vec::with_capacity(batch.len());
    let mut skipped = Vec::new();

    for upload in batch {
        match PublicKey::try_from(upload.public_key.as_slice()) {
            Ok(public_key) => {
                if seen.insert(upload.key_id) {
                    valid.push(OneTimePreKey { key_id: upload.key_id, public_key });
                } else {
                    skipped.push(SkippedPreKey {
                        key_id: upload.key_id,
                        reason: SkipReason::DuplicateInBatch,
                    });
                }
            },
            Err(e) => skipped.push(SkippedPreKey {
                key_id: upload.key_id,
                reason: SkipReason::Malformed(e.to_string()),
            }),
        }
    }

    (valid, skipped)
}
