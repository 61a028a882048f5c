//! Keyhold core.
//!
//! Pure domain layer for end-to-end-encryption key custody: identifiers, key
//! newtypes with structural validation, stored records, and the error
//! taxonomy shared by every Keyhold crate.
//!
//! The server is honest-but-untrusted infrastructure. It custodies public key
//! material and opaque sender-key blobs; it never derives session keys and
//! never verifies signatures cryptographically. Validation here is strictly
//! structural (byte lengths, emptiness, size ceilings).
//!
//! # Components
//!
//! - [`ids`]: account, channel and distribution identifiers
//! - [`keys`]: [`PublicKey`], [`Signature`], [`SenderKeyBlob`]
//! - [`records`]: identity, prekey and sender-key records plus upload reports
//! - [`membership`]: the injected [`MembershipOracle`] capability
//! - [`env`]: wall-clock abstraction for deterministic tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod ids;
pub mod keys;
pub mod membership;
pub mod records;

pub use env::{Environment, ManualEnv};
pub use error::{ErrorClass, KeyError, StorageError};
pub use ids::{AccountId, ChannelId, DistributionId, KeyId, UserId};
pub use keys::{InvalidLength, PUBLIC_KEY_SIZE, PublicKey, SIGNATURE_SIZE, SenderKeyBlob, Signature};
pub use membership::{MembershipChange, MembershipOracle, Role, StaticMembership};
pub use records::{
    ChannelKeyStatus, IdentityRecord, Invalidation, MemberKeyStatus, OneTimePreKey, PreKeyBundle,
    PreKeyUpload, RotationMark, SenderKeyRecord, SignedPreKey, SignedPreKeyUpload, SkipReason,
    SkippedPreKey, UploadReport, partition_pre_keys,
};
