//! Rotation Coordinator: per-channel sender keys and their rotation.
//!
//! Each member of a channel uploads a sender key; other members fetch it to
//! decrypt that member's messages. Sender keys are broadcast-symmetric, so any
//! membership change (either direction) invalidates *every* key of the
//! channel, and each remaining member re-uploads independently.
//!
//! # Iterations
//!
//! Every upload for a (channel, user) pair gets an iteration strictly greater
//! than any issued before for that pair, across deletes and invalidations.
//! Only [`RotationCoordinator::purge_channel`] (terminal deletion) resets it.
//!
//! # Races
//!
//! Invalidation and uploads are not mutually atomic. A re-upload that lands
//! just before an invalidation is deleted by it; one that lands just after
//! survives. Either way the iteration never repeats, and clients detect the
//! outcome through [`RotationCoordinator::channel_key_status`].

use std::collections::HashMap;

use keyhold_core::{
    ChannelId, ChannelKeyStatus, DistributionId, Environment, Invalidation, KeyError,
    MemberKeyStatus, MembershipChange, MembershipOracle, Role, SenderKeyBlob, SenderKeyRecord,
    UserId,
};

use crate::{config::CoordinatorConfig, storage::KeyStore};

/// Coordinator of channel sender keys.
#[derive(Clone)]
pub struct RotationCoordinator<S: KeyStore, M: MembershipOracle, E: Environment> {
    storage: S,
    membership: M,
    env: E,
    config: CoordinatorConfig,
}

impl<S: KeyStore, M: MembershipOracle, E: Environment> RotationCoordinator<S, M, E> {
    /// Create a coordinator over `storage`, authorizing through `membership`.
    pub fn new(storage: S, membership: M, env: E, config: CoordinatorConfig) -> Self {
        Self { storage, membership, env, config }
    }

    /// Coordinator limits.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Upload `user`'s sender key for `channel`.
    ///
    /// # Errors
    ///
    /// - `NotAMember` if `user` is not a current member
    /// - `InvalidKeyMaterial` if the blob is empty or above the size ceiling
    /// - `Membership` / `Storage` on collaborator failure
    pub fn upload_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
        distribution_id: DistributionId,
        sender_key: Vec<u8>,
    ) -> Result<SenderKeyRecord, KeyError> {
        self.require_member(channel, user)?;
        let sender_key = SenderKeyBlob::parse(sender_key, self.config.max_sender_key_bytes)?;

        let record = self.storage.upsert_sender_key(
            channel,
            user,
            distribution_id,
            &sender_key,
            self.env.wall_clock_secs(),
        )?;

        tracing::info!(
            %channel,
            %user,
            %distribution_id,
            iteration = record.iteration,
            "sender key uploaded"
        );

        Ok(record)
    }

    /// All sender keys currently held for `channel`, ordered by user.
    ///
    /// # Errors
    ///
    /// - `NotAMember` if `requester` is not a current member
    pub fn get_sender_keys(
        &self,
        channel: ChannelId,
        requester: UserId,
    ) -> Result<Vec<SenderKeyRecord>, KeyError> {
        self.require_member(channel, requester)?;

        let keys = self.storage.load_sender_keys(channel)?;
        tracing::debug!(%channel, %requester, count = keys.len(), "sender keys read");

        Ok(keys)
    }

    /// Sender key of `user` in `channel`.
    ///
    /// # Errors
    ///
    /// - `NotAMember` if `requester` is not a current member
    /// - `SenderKeyNotFound` if `user` holds no key (never uploaded, deleted
    ///   or rotated away)
    pub fn get_sender_key(
        &self,
        channel: ChannelId,
        requester: UserId,
        user: UserId,
    ) -> Result<SenderKeyRecord, KeyError> {
        self.require_member(channel, requester)?;

        self.storage
            .load_sender_key(channel, user)?
            .ok_or(KeyError::SenderKeyNotFound { channel, user })
    }

    /// Retire `user`'s own sender key. Idempotent.
    ///
    /// Not membership-gated: a member removed from the channel may still clean
    /// up after itself. The iteration high-water mark is kept.
    pub fn delete_sender_key(&self, channel: ChannelId, user: UserId) -> Result<bool, KeyError> {
        let removed = self.storage.delete_sender_key(channel, user)?;
        tracing::debug!(%channel, %user, removed, "sender key deleted");
        Ok(removed)
    }

    /// Delete every sender key of `channel` and advance its rotation.
    ///
    /// Unconditional; there is no per-member rotation.
    pub fn invalidate_channel(&self, channel: ChannelId) -> Result<Invalidation, KeyError> {
        let invalidation = self.storage.invalidate_channel(channel, self.env.wall_clock_secs())?;

        tracing::info!(
            %channel,
            removed = invalidation.removed,
            rotation = invalidation.mark.rotation,
            "channel sender keys invalidated"
        );

        Ok(invalidation)
    }

    /// Membership-change hook. Both additions and removals rotate.
    pub fn on_membership_changed(
        &self,
        channel: ChannelId,
        change: MembershipChange,
    ) -> Result<Invalidation, KeyError> {
        tracing::info!(%channel, ?change, "membership changed, rotating sender keys");
        self.invalidate_channel(channel)
    }

    /// Rotation progress: which current members hold a key.
    ///
    /// # Errors
    ///
    /// - `NotAMember` if `requester` is not a current member
    pub fn channel_key_status(
        &self,
        channel: ChannelId,
        requester: UserId,
    ) -> Result<ChannelKeyStatus, KeyError> {
        self.require_member(channel, requester)?;

        let mut members = self.membership.members(channel)?;
        members.sort_unstable_by_key(|(user, _)| *user);

        let mut keys: HashMap<UserId, SenderKeyRecord> = self
            .storage
            .load_sender_keys(channel)?
            .into_iter()
            .map(|record| (record.user, record))
            .collect();
        let rotation = self.storage.channel_rotation(channel)?;

        let members: Vec<MemberKeyStatus> = members
            .into_iter()
            .map(|(user, role)| member_status(user, role, keys.remove(&user)))
            .collect();

        let status = ChannelKeyStatus { channel, rotation, members };
        tracing::debug!(
            %channel,
            rotation = rotation.map_or(0, |m| m.rotation),
            pending = status.pending().count(),
            "channel key status"
        );

        Ok(status)
    }

    /// Terminal channel deletion, including iteration history.
    ///
    /// Only for channels that will never be used again: after a purge the
    /// next upload for a pair starts at iteration 0.
    pub fn purge_channel(&self, channel: ChannelId) -> Result<usize, KeyError> {
        let removed = self.storage.purge_channel(channel)?;
        tracing::info!(%channel, removed, "channel purged");
        Ok(removed)
    }

    fn require_member(&self, channel: ChannelId, user: UserId) -> Result<Role, KeyError> {
        match self.membership.member_role(channel, user)? {
            Some(role) => Ok(role),
            None => {
                tracing::warn!(%channel, %user, "rejected non-member");
                Err(KeyError::NotAMember { channel, user })
            },
        }
    }
}

fn member_status(user: UserId, role: Role, key: Option<SenderKeyRecord>) -> MemberKeyStatus {
    MemberKeyStatus {
        user,
        role,
        has_key: key.is_some(),
        iteration: key.as_ref().map(|k| k.iteration),
        distribution_id: key.map(|k| k.distribution_id),
    }
}

#[cfg(test)]
mod tests {
    use keyhold_core::{AccountId, ManualEnv, StaticMembership};
    use uuid::Uuid;

    use super::*;
    use crate::storage::MemoryStorage;

    type Coordinator = RotationCoordinator<MemoryStorage, StaticMembership, ManualEnv>;

    const CH: ChannelId = ChannelId(10);

    fn setup() -> (Coordinator, StaticMembership) {
        let membership = StaticMembership::new();
        membership.add(CH, AccountId(1), Role::Owner);
        membership.add(CH, AccountId(2), Role::Member);
        let coordinator = RotationCoordinator::new(
            MemoryStorage::new(),
            membership.clone(),
            ManualEnv::at(500),
            CoordinatorConfig { max_sender_key_bytes: 8 },
        );
        (coordinator, membership)
    }

    fn dist(n: u128) -> DistributionId {
        DistributionId::new(Uuid::from_u128(n))
    }

    #[test]
    fn non_member_cannot_upload_or_read() {
        let (coordinator, _) = setup();
        let outsider = AccountId(99);

        let err = coordinator.upload_sender_key(CH, outsider, dist(1), b"k".to_vec()).unwrap_err();
        assert_eq!(err, KeyError::NotAMember { channel: CH, user: outsider });
        assert!(matches!(
            coordinator.get_sender_keys(CH, outsider),
            Err(KeyError::NotAMember { .. })
        ));
        assert!(matches!(
            coordinator.get_sender_key(CH, outsider, AccountId(1)),
            Err(KeyError::NotAMember { .. })
        ));
    }

    #[test]
    fn blob_size_is_bounded() {
        let (coordinator, _) = setup();

        let err = coordinator.upload_sender_key(CH, AccountId(1), dist(1), vec![]).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeyMaterial { field: "sender_key", .. }));

        let err = coordinator.upload_sender_key(CH, AccountId(1), dist(1), vec![0; 9]).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeyMaterial { .. }));

        coordinator.upload_sender_key(CH, AccountId(1), dist(1), vec![0; 8]).unwrap();
    }

    #[test]
    fn status_tracks_rotation() {
        let (coordinator, membership) = setup();
        coordinator.upload_sender_key(CH, AccountId(1), dist(1), b"a".to_vec()).unwrap();
        coordinator.upload_sender_key(CH, AccountId(2), dist(2), b"b".to_vec()).unwrap();

        let status = coordinator.channel_key_status(CH, AccountId(1)).unwrap();
        assert!(status.is_ready());
        assert_eq!(status.rotation, None);

        let change = membership.add(CH, AccountId(3), Role::Member).unwrap();
        let invalidation = coordinator.on_membership_changed(CH, change).unwrap();
        assert_eq!(invalidation.removed, 2);
        assert_eq!(invalidation.mark.rotation, 1);

        coordinator.upload_sender_key(CH, AccountId(2), dist(3), b"c".to_vec()).unwrap();

        let status = coordinator.channel_key_status(CH, AccountId(3)).unwrap();
        assert!(!status.is_ready());
        assert_eq!(status.rotation.map(|m| m.rotation), Some(1));
        assert_eq!(status.pending().collect::<Vec<_>>(), vec![AccountId(1), AccountId(3)]);

        let member_two = &status.members[1];
        assert_eq!(member_two.user, AccountId(2));
        assert_eq!(member_two.iteration, Some(1));
        assert_eq!(member_two.distribution_id, Some(dist(3)));
    }

    #[test]
    fn removed_member_can_still_delete_own_key() {
        let (coordinator, membership) = setup();
        coordinator.upload_sender_key(CH, AccountId(2), dist(1), b"k".to_vec()).unwrap();
        membership.remove(CH, AccountId(2));

        assert!(coordinator.delete_sender_key(CH, AccountId(2)).unwrap());
        assert!(!coordinator.delete_sender_key(CH, AccountId(2)).unwrap());
    }

    #[test]
    fn get_sender_key_after_delete_is_not_found() {
        let (coordinator, _) = setup();
        coordinator.upload_sender_key(CH, AccountId(2), dist(1), b"k".to_vec()).unwrap();
        coordinator.delete_sender_key(CH, AccountId(2)).unwrap();

        let err = coordinator.get_sender_key(CH, AccountId(1), AccountId(2)).unwrap_err();
        assert!(err.is_expected_absence());

        let record =
            coordinator.upload_sender_key(CH, AccountId(2), dist(1), b"k".to_vec()).unwrap();
        assert_eq!(record.iteration, 1);
    }
}
