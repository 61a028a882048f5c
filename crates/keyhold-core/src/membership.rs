//! Channel membership capability.
//!
//! Membership is owned by the channel/organization service. Keyhold only asks
//! two questions of it: "is this user a member, and with what role?" and
//! "who are the current members?". The answer authorizes an action; sender-key
//! state is never stored here.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::KeyError,
    ids::{ChannelId, UserId},
};

/// Role of a channel member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Channel owner
    Owner,
    /// Channel administrator
    Admin,
    /// Regular member
    Member,
}

/// A change in channel membership. Either direction forces a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// User joined the channel
    Added(UserId),
    /// User left or was removed
    Removed(UserId),
}

impl MembershipChange {
    /// User affected by the change.
    pub fn user(&self) -> UserId {
        match self {
            Self::Added(user) | Self::Removed(user) => *user,
        }
    }
}

/// Read-only view of channel membership.
///
/// Injected into the Rotation Coordinator so it stays testable with a fake.
/// Failures should be reported as [`KeyError::Membership`].
pub trait MembershipOracle: Send + Sync {
    /// Role of `user` in `channel`, or `None` if not a member.
    fn member_role(&self, channel: ChannelId, user: UserId) -> Result<Option<Role>, KeyError>;

    /// All current members of `channel`. Order is not guaranteed.
    fn members(&self, channel: ChannelId) -> Result<Vec<(UserId, Role)>, KeyError>;
}

impl<T: MembershipOracle + ?Sized> MembershipOracle for Arc<T> {
    fn member_role(&self, channel: ChannelId, user: UserId) -> Result<Option<Role>, KeyError> {
        (**self).member_role(channel, user)
    }

    fn members(&self, channel: ChannelId) -> Result<Vec<(UserId, Role)>, KeyError> {
        (**self).members(channel)
    }
}

/// In-memory membership table.
///
/// Clone shares the same underlying table. Used by tests and by the admin
/// binary; production deployments plug in the channel service instead.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    channels: Arc<RwLock<HashMap<ChannelId, BTreeMap<UserId, Role>>>>,
}

impl StaticMembership {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or re-role a member. Returns the change if the user was not
    /// already a member.
    pub fn add(&self, channel: ChannelId, user: UserId, role: Role) -> Option<MembershipChange> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let previous = channels.entry(channel).or_default().insert(user, role);
        previous.is_none().then_some(MembershipChange::Added(user))
    }

    /// Remove a member. Returns the change if the user was a member.
    pub fn remove(&self, channel: ChannelId, user: UserId) -> Option<MembershipChange> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let members = channels.get_mut(&channel)?;
        let removed = members.remove(&user).map(|_| MembershipChange::Removed(user));
        if members.is_empty() {
            channels.remove(&channel);
        }
        removed
    }
}

impl MembershipOracle for StaticMembership {
    fn member_role(&self, channel: ChannelId, user: UserId) -> Result<Option<Role>, KeyError> {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        Ok(channels.get(&channel).and_then(|members| members.get(&user)).copied())
    }

    fn members(&self, channel: ChannelId) -> Result<Vec<(UserId, Role)>, KeyError> {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        Ok(channels
            .get(&channel)
            .map(|members| members.iter().map(|(user, role)| (*user, *role)).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AccountId;

    #[test]
    fn add_and_remove_report_changes() {
        let table = StaticMembership::new();
        let channel = ChannelId(1);

        assert_eq!(
            table.add(channel, AccountId(7), Role::Member),
            Some(MembershipChange::Added(AccountId(7)))
        );
        // Re-role is not a membership change
        assert_eq!(table.add(channel, AccountId(7), Role::Admin), None);
        assert_eq!(table.member_role(channel, AccountId(7)).unwrap(), Some(Role::Admin));

        assert_eq!(
            table.remove(channel, AccountId(7)),
            Some(MembershipChange::Removed(AccountId(7)))
        );
        assert_eq!(table.remove(channel, AccountId(7)), None);
        assert!(table.members(channel).unwrap().is_empty());
    }

    #[test]
    fn clone_shares_state() {
        let a = StaticMembership::new();
        let b = a.clone();
        a.add(ChannelId(2), AccountId(1), Role::Owner);
        assert_eq!(b.members(ChannelId(2)).unwrap(), vec![(AccountId(1), Role::Owner)]);
    }

    #[test]
    fn unknown_channel_has_no_members() {
        let table = StaticMembership::new();
        assert_eq!(table.member_role(ChannelId(9), AccountId(1)).unwrap(), None);
        assert!(table.members(ChannelId(9)).unwrap().is_empty());
    }
}
