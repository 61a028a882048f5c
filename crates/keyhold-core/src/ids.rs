//! Identifier types.
//!
//! Accounts and channel members share one namespace: the user who uploads a
//! sender key is the same account that owns an identity key.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-assigned identifier of a signed or one-time prekey.
///
/// Unique per account, not globally.
pub type KeyId = u32;

/// Identifies an account that owns E2EE key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

/// Channel member identifier. Same namespace as [`AccountId`].
pub type UserId = AccountId;

impl AccountId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a multi-member group channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u128);

impl ChannelId {
    /// Raw numeric value.
    pub fn get(self) -> u128 {
        self.0
    }
}

impl From<u128> for ChannelId {
    fn from(id: u128) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Opaque identifier of a sender-key epoch, chosen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionId(pub Uuid);

impl DistributionId {
    /// Wrap a UUID.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DistributionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_displays_as_fixed_width_hex() {
        assert_eq!(ChannelId(0xab).to_string(), format!("{:0>32}", "ab"));
    }

    #[test]
    fn distribution_id_displays_hyphenated() {
        let id = DistributionId::new(Uuid::from_u128(1));
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000001");
    }
}
