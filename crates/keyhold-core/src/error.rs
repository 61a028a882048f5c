//! Error taxonomy.
//!
//! Every failure reaches the caller as a typed value; nothing here is fatal to
//! the process. Two variants describe *expected absence* rather than failure
//! ([`KeyError::NoKeysUploaded`], [`KeyError::SenderKeyNotFound`]) and callers
//! are expected to branch on them: prompt the peer to bootstrap, or wait for a
//! rotation to complete.

use std::fmt;

use thiserror::Error;

use crate::ids::{AccountId, ChannelId, UserId};

/// Errors from a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Stored value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, lock poisoning)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Upserts are idempotent, so client-side retry of a failed write is safe.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Coarse classification for mapping onto a transport's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Client must fix its input (400)
    InvalidInput,
    /// Expected absence (404)
    NotFound,
    /// Caller is not authorized for the channel (403)
    Forbidden,
    /// Backend failure, retry with backoff (503)
    Unavailable,
}

/// Errors from Bundle Registry and Rotation Coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Structurally malformed key material. Not retryable without a client
    /// fix.
    #[error("invalid key material in {field}: {reason}")]
    InvalidKeyMaterial {
        /// Which input was malformed
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Account has no identity key or no signed prekey.
    #[error("no keys uploaded for account {0}")]
    NoKeysUploaded(AccountId),

    /// Caller is not a current member of the channel.
    #[error("user {user} is not a member of channel {channel}")]
    NotAMember {
        /// Channel the caller tried to act on
        channel: ChannelId,
        /// Caller
        user: UserId,
    },

    /// Member has no sender key in this channel (never uploaded, deleted, or
    /// rotated away).
    #[error("no sender key for user {user} in channel {channel}")]
    SenderKeyNotFound {
        /// Channel
        channel: ChannelId,
        /// Member
        user: UserId,
    },

    /// One-time prekey batch above the configured ceiling.
    #[error("batch of {len} prekeys exceeds limit of {max}")]
    BatchTooLarge {
        /// Submitted batch length
        len: usize,
        /// Configured ceiling
        max: usize,
    },

    /// Membership oracle could not answer.
    #[error("membership lookup failed: {0}")]
    Membership(String),

    /// Storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KeyError {
    /// Build an [`KeyError::InvalidKeyMaterial`].
    pub fn invalid(field: &'static str, reason: impl fmt::Display) -> Self {
        Self::InvalidKeyMaterial { field, reason: reason.to_string() }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Membership(_) => true,
            _ => false,
        }
    }

    /// Whether this is an expected absence rather than a failure.
    pub fn is_expected_absence(&self) -> bool {
        matches!(self, Self::NoKeysUploaded(_) | Self::SenderKeyNotFound { .. })
    }

    /// Classification for transport status mapping.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidKeyMaterial { .. } | Self::BatchTooLarge { .. } => {
                ErrorClass::InvalidInput
            },
            Self::NoKeysUploaded(_) | Self::SenderKeyNotFound { .. } => ErrorClass::NotFound,
            Self::NotAMember { .. } => ErrorClass::Forbidden,
            Self::Membership(_) | Self::Storage(_) => ErrorClass::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(KeyError::invalid("identity_key", "short").class(), ErrorClass::InvalidInput);
        let too_large = KeyError::BatchTooLarge { len: 101, max: 100 };
        assert_eq!(too_large.class(), ErrorClass::InvalidInput);
        assert_eq!(KeyError::NoKeysUploaded(AccountId(1)).class(), ErrorClass::NotFound);
        assert_eq!(
            KeyError::NotAMember { channel: ChannelId(1), user: AccountId(2) }.class(),
            ErrorClass::Forbidden
        );
        assert_eq!(
            KeyError::Storage(StorageError::Io("disk".into())).class(),
            ErrorClass::Unavailable
        );
    }

    #[test]
    fn only_io_is_transient() {
        assert!(KeyError::from(StorageError::Io("x".into())).is_transient());
        assert!(!KeyError::from(StorageError::Serialization("x".into())).is_transient());
        assert!(!KeyError::NoKeysUploaded(AccountId(1)).is_transient());
    }

    #[test]
    fn expected_absence() {
        assert!(KeyError::NoKeysUploaded(AccountId(1)).is_expected_absence());
        assert!(
            KeyError::SenderKeyNotFound { channel: ChannelId(1), user: AccountId(1) }
                .is_expected_absence()
        );
        assert!(!KeyError::BatchTooLarge { len: 2, max: 1 }.is_expected_absence());
    }

    #[test]
    fn display() {
        let err = KeyError::BatchTooLarge { len: 150, max: 100 };
        assert_eq!(err.to_string(), "batch of 150 prekeys exceeds limit of 100");

        let err = KeyError::NoKeysUploaded(AccountId(42));
        assert_eq!(err.to_string(), "no keys uploaded for account 42");
    }
}
