//! Wire-level entry points.
//!
//! [`KeyApi`] is what an RPC/HTTP layer calls once it has authenticated the
//! caller: one method per registry or coordinator operation, taking and
//! returning `keyhold-proto` payloads. Base64 is undone here; everything else
//! is delegated.

use keyhold_core::{
    AccountId, ChannelId, Environment, KeyError, MembershipChange, MembershipOracle, UserId,
};
use keyhold_proto::{
    BundleResponse, ChannelKeyStatusResponse, InvalidationResponse, PreKeyCountResponse,
    SenderKeyResponse, SenderKeysResponse, SignedPreKeyWire, UpdateSignedPreKeyRequest,
    UploadBundleRequest, UploadPreKeysRequest, UploadReportResponse, UploadSenderKeyRequest,
    decode_b64, decode_pre_keys,
};

use crate::{
    bundle_registry::BundleRegistry, config::KeyholdConfig,
    rotation_coordinator::RotationCoordinator, storage::KeyStore,
};

/// Registry and coordinator behind one wire-typed facade.
#[derive(Clone)]
pub struct KeyApi<S: KeyStore, M: MembershipOracle, E: Environment> {
    registry: BundleRegistry<S, E>,
    coordinator: RotationCoordinator<S, M, E>,
}

impl<S: KeyStore, M: MembershipOracle, E: Environment> KeyApi<S, M, E> {
    /// Build both components over one shared store.
    pub fn new(storage: S, membership: M, env: E, config: KeyholdConfig) -> Self {
        Self {
            registry: BundleRegistry::new(storage.clone(), env.clone(), config.registry),
            coordinator: RotationCoordinator::new(storage, membership, env, config.coordinator),
        }
    }

    /// Bundle Registry.
    pub fn registry(&self) -> &BundleRegistry<S, E> {
        &self.registry
    }

    /// Rotation Coordinator.
    pub fn coordinator(&self) -> &RotationCoordinator<S, M, E> {
        &self.coordinator
    }

    /// Upload a full bundle for the authenticated `account`.
    ///
    /// One-time prekeys with broken base64 are reported as skipped alongside
    /// those the registry rejects.
    pub fn upload_bundle(
        &self,
        account: AccountId,
        request: &UploadBundleRequest,
    ) -> Result<UploadReportResponse, KeyError> {
        self.check_batch(request.one_time_pre_keys.len())?;

        let identity_key = decode_b64("identity_key", &request.identity_key)?;
        let signed_prekey = request.signed_pre_key.decode()?;
        let (pre_keys, undecodable) = decode_pre_keys(&request.one_time_pre_keys);

        let mut report = self.registry.upload_bundle(
            account,
            &identity_key,
            request.registration_id,
            &signed_prekey,
            &pre_keys,
        )?;
        report.extend_skipped(undecodable);

        Ok(UploadReportResponse::from(&report))
    }

    /// Fetch a bundle for `account`, consuming one one-time prekey.
    pub fn get_bundle(&self, account: AccountId) -> Result<BundleResponse, KeyError> {
        Ok(BundleResponse::from(&self.registry.get_bundle(account)?))
    }

    /// Replenish one-time prekeys.
    pub fn upload_pre_keys(
        &self,
        account: AccountId,
        request: &UploadPreKeysRequest,
    ) -> Result<UploadReportResponse, KeyError> {
        self.check_batch(request.pre_keys.len())?;

        let (pre_keys, undecodable) = decode_pre_keys(&request.pre_keys);
        let mut report = self.registry.upload_pre_keys(account, &pre_keys)?;
        report.extend_skipped(undecodable);

        Ok(UploadReportResponse::from(&report))
    }

    /// Remaining one-time prekeys.
    pub fn pre_key_count(&self, account: AccountId) -> Result<PreKeyCountResponse, KeyError> {
        Ok(PreKeyCountResponse { count: self.registry.pre_key_count(account)? })
    }

    /// Rotate the signed prekey. Echoes the stored key.
    pub fn update_signed_pre_key(
        &self,
        account: AccountId,
        request: &UpdateSignedPreKeyRequest,
    ) -> Result<SignedPreKeyWire, KeyError> {
        let upload = request.signed_pre_key.decode()?;
        let stored = self.registry.update_signed_pre_key(account, &upload)?;
        Ok(SignedPreKeyWire::from(&stored))
    }

    /// Remove all of `account`'s keys.
    pub fn delete_account_keys(&self, account: AccountId) -> Result<bool, KeyError> {
        self.registry.delete_account_keys(account)
    }

    /// Upload the caller's sender key.
    pub fn upload_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
        request: &UploadSenderKeyRequest,
    ) -> Result<SenderKeyResponse, KeyError> {
        let (distribution_id, blob) = request.decode()?;
        let record = self.coordinator.upload_sender_key(channel, user, distribution_id, blob)?;
        Ok(SenderKeyResponse::from(&record))
    }

    /// All sender keys of a channel.
    pub fn get_sender_keys(
        &self,
        channel: ChannelId,
        requester: UserId,
    ) -> Result<SenderKeysResponse, KeyError> {
        let records = self.coordinator.get_sender_keys(channel, requester)?;
        Ok(SenderKeysResponse::from(records.as_slice()))
    }

    /// One member's sender key.
    pub fn get_sender_key(
        &self,
        channel: ChannelId,
        requester: UserId,
        user: UserId,
    ) -> Result<SenderKeyResponse, KeyError> {
        Ok(SenderKeyResponse::from(&self.coordinator.get_sender_key(channel, requester, user)?))
    }

    /// Retire the caller's own sender key.
    pub fn delete_sender_key(&self, channel: ChannelId, user: UserId) -> Result<bool, KeyError> {
        self.coordinator.delete_sender_key(channel, user)
    }

    /// Rotate a channel.
    pub fn invalidate_channel(&self, channel: ChannelId) -> Result<InvalidationResponse, KeyError> {
        Ok(InvalidationResponse::from(&self.coordinator.invalidate_channel(channel)?))
    }

    /// Membership-change hook.
    pub fn on_membership_changed(
        &self,
        channel: ChannelId,
        change: MembershipChange,
    ) -> Result<InvalidationResponse, KeyError> {
        Ok(InvalidationResponse::from(&self.coordinator.on_membership_changed(channel, change)?))
    }

    /// Rotation progress of a channel.
    pub fn channel_key_status(
        &self,
        channel: ChannelId,
        requester: UserId,
    ) -> Result<ChannelKeyStatusResponse, KeyError> {
        let status = self.coordinator.channel_key_status(channel, requester)?;
        Ok(ChannelKeyStatusResponse::from(&status))
    }

    /// Terminal channel deletion.
    pub fn purge_channel(&self, channel: ChannelId) -> Result<usize, KeyError> {
        self.coordinator.purge_channel(channel)
    }

    /// Reject oversized batches before spending time on base64.
    fn check_batch(&self, len: usize) -> Result<(), KeyError> {
        let max = self.registry.config().max_prekey_batch;
        if len > max {
            return Err(KeyError::BatchTooLarge { len, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keyhold_core::{ManualEnv, Role, StaticMembership};
    use keyhold_proto::{PreKeyWire, encode_b64};
    use uuid::Uuid;

    use super::*;
    use crate::storage::MemoryStorage;

    type Api = KeyApi<MemoryStorage, StaticMembership, ManualEnv>;

    fn api() -> (Api, StaticMembership) {
        let membership = StaticMembership::new();
        let api = KeyApi::new(
            MemoryStorage::new(),
            membership.clone(),
            ManualEnv::at(0),
            KeyholdConfig::default(),
        );
        (api, membership)
    }

    fn bundle_request(pre_keys: Vec<PreKeyWire>) -> UploadBundleRequest {
        UploadBundleRequest {
            identity_key: encode_b64(&[1; 32]),
            registration_id: 42,
            signed_pre_key: SignedPreKeyWire {
                key_id: 1,
                public_key: encode_b64(&[2; 32]),
                signature: encode_b64(&[3; 64]),
            },
            one_time_pre_keys: pre_keys,
        }
    }

    #[test]
    fn undecodable_prekeys_are_reported() {
        let (api, _) = api();
        let request = bundle_request(vec![
            PreKeyWire { key_id: 1, public_key: encode_b64(&[1; 32]) },
            PreKeyWire { key_id: 2, public_key: "***".into() },
        ]);

        let report = api.upload_bundle(AccountId(1), &request).unwrap();
        assert_eq!(report.stored, vec![1]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.starts_with("malformed"));
    }

    #[test]
    fn bad_identity_base64_is_invalid_key_material() {
        let (api, _) = api();
        let mut request = bundle_request(vec![]);
        request.identity_key = "?".into();

        let err = api.upload_bundle(AccountId(1), &request).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeyMaterial { field: "identity_key", .. }));
    }

    #[test]
    fn oversized_wire_batch_rejected_before_decoding() {
        let (api, _) = api();
        let pre_keys = (0..101).map(|i| PreKeyWire { key_id: i, public_key: "!".into() }).collect();

        let err = api.upload_bundle(AccountId(1), &bundle_request(pre_keys)).unwrap_err();
        assert_eq!(err, KeyError::BatchTooLarge { len: 101, max: 100 });
    }

    #[test]
    fn bundle_and_sender_key_flow() {
        let (api, membership) = api();
        api.upload_bundle(AccountId(1), &bundle_request(vec![])).unwrap();

        let bundle = api.get_bundle(AccountId(1)).unwrap();
        assert_eq!(bundle.registration_id, 42);
        assert!(bundle.one_time_pre_key.is_none());

        let channel = ChannelId(5);
        membership.add(channel, AccountId(1), Role::Owner);
        let request = UploadSenderKeyRequest {
            distribution_id: Uuid::from_u128(1),
            sender_key: encode_b64(b"sender"),
        };
        let uploaded = api.upload_sender_key(channel, AccountId(1), &request).unwrap();
        assert_eq!(uploaded.iteration, 0);

        let fetched = api.get_sender_key(channel, AccountId(1), AccountId(1)).unwrap();
        assert_eq!(fetched.sender_key, encode_b64(b"sender"));

        let status = api.channel_key_status(channel, AccountId(1)).unwrap();
        assert!(status.ready);
        assert_eq!(status.rotation, 0);

        let inv = api.invalidate_channel(channel).unwrap();
        assert_eq!(inv.removed, 1);
        assert!(!api.channel_key_status(channel, AccountId(1)).unwrap().ready);
    }

    #[test]
    fn already_stored_reason_on_wire() {
        let (api, _) = api();
        let pre_key = PreKeyWire { key_id: 9, public_key: encode_b64(&[9; 32]) };
        api.upload_bundle(AccountId(1), &bundle_request(vec![pre_key.clone()])).unwrap();

        let report = api
            .upload_pre_keys(AccountId(1), &UploadPreKeysRequest { pre_keys: vec![pre_key] })
            .unwrap();
        assert!(report.stored.is_empty());
        assert_eq!(report.skipped[0].key_id, 9);
        assert_eq!(report.skipped[0].reason, "key_id already stored");
        assert_eq!(api.pre_key_count(AccountId(1)).unwrap().count, 1);
    }
}
