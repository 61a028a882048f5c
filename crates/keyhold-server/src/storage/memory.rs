#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use keyhold_core::{
    AccountId, ChannelId, DistributionId, IdentityRecord, Invalidation, KeyId, OneTimePreKey,
    PreKeyBundle, PublicKey, RotationMark, SenderKeyBlob, SenderKeyRecord, SignedPreKey,
    StorageError, UserId,
};

use super::{BundleTake, KeyStore, PreKeyInsert};

/// In-memory storage implementation for testing and simulation
///
/// All state is wrapped in `Arc<Mutex<>>` to allow Clone and concurrent
/// access. Every trait method holds the lock for its whole body, so the mutex
/// is the transaction boundary. A poisoned mutex surfaces as
/// [`StorageError::Io`].
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    identities: HashMap<AccountId, IdentityRecord>,

    /// Signed prekeys per account with their write sequence
    signed_prekeys: HashMap<AccountId, BTreeMap<KeyId, (SignedPreKey, u64)>>,

    one_time_prekeys: HashMap<AccountId, BTreeMap<KeyId, PublicKey>>,

    sender_keys: HashMap<ChannelId, BTreeMap<UserId, SenderKeyRecord>>,

    /// Highest iteration ever issued per (channel, user)
    iterations: HashMap<(ChannelId, UserId), u64>,

    rotations: HashMap<ChannelId, RotationMark>,

    /// Store-wide signed prekey write counter
    sequence: u64,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Number of accounts with an identity record.
    ///
    /// Useful for debugging and testing.
    pub fn account_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.identities.len())
    }

    /// Total number of sender keys across all channels.
    pub fn sender_key_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.sender_keys.values().map(BTreeMap::len).sum())
    }

    /// Drop an account's signed prekeys, leaving its identity in place.
    ///
    /// No trait operation produces this state; tests use it to exercise the
    /// missing-signed-prekey path.
    #[cfg(test)]
    pub(crate) fn clear_signed_prekeys(&self, account: AccountId) -> Result<(), StorageError> {
        self.lock()?.signed_prekeys.remove(&account);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory storage mutex poisoned".into()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageInner {
    fn put_signed_prekey(&mut self, account: AccountId, spk: &SignedPreKey) {
        self.sequence += 1;
        let sequence = self.sequence;
        self.signed_prekeys.entry(account).or_default().insert(spk.key_id, (spk.clone(), sequence));
    }

    fn put_one_time_prekeys(
        &mut self,
        account: AccountId,
        prekeys: &[OneTimePreKey],
    ) -> PreKeyInsert {
        let pool = self.one_time_prekeys.entry(account).or_default();
        let mut insert = PreKeyInsert::default();

        for prekey in prekeys {
            if pool.contains_key(&prekey.key_id) {
                insert.already_stored.push(prekey.key_id);
            } else {
                pool.insert(prekey.key_id, prekey.public_key);
                insert.stored.push(prekey.key_id);
            }
        }

        insert
    }

    fn current_signed_prekey(&self, account: AccountId) -> Option<SignedPreKey> {
        self.signed_prekeys
            .get(&account)?
            .values()
            .max_by_key(|(spk, sequence)| (spk.created_at_secs, *sequence))
            .map(|(spk, _)| spk.clone())
    }
}

impl KeyStore for MemoryStorage {
    fn upsert_bundle(
        &self,
        identity: &IdentityRecord,
        signed_prekey: &SignedPreKey,
        one_time_prekeys: &[OneTimePreKey],
    ) -> Result<PreKeyInsert, StorageError> {
        let mut inner = self.lock()?;

        inner.identities.insert(identity.account, identity.clone());
        inner.put_signed_prekey(identity.account, signed_prekey);
        Ok(inner.put_one_time_prekeys(identity.account, one_time_prekeys))
    }

    fn upsert_signed_prekey(
        &self,
        account: AccountId,
        signed_prekey: &SignedPreKey,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;

        if !inner.identities.contains_key(&account) {
            return Ok(false);
        }

        inner.put_signed_prekey(account, signed_prekey);
        Ok(true)
    }

    fn insert_one_time_prekeys(
        &self,
        account: AccountId,
        prekeys: &[OneTimePreKey],
    ) -> Result<Option<PreKeyInsert>, StorageError> {
        let mut inner = self.lock()?;

        if !inner.identities.contains_key(&account) {
            return Ok(None);
        }

        Ok(Some(inner.put_one_time_prekeys(account, prekeys)))
    }

    fn load_identity(&self, account: AccountId) -> Result<Option<IdentityRecord>, StorageError> {
        Ok(self.lock()?.identities.get(&account).cloned())
    }

    fn current_signed_prekey(
        &self,
        account: AccountId,
    ) -> Result<Option<SignedPreKey>, StorageError> {
        Ok(self.lock()?.current_signed_prekey(account))
    }

    fn take_bundle(&self, account: AccountId) -> Result<BundleTake, StorageError> {
        let mut inner = self.lock()?;

        let Some(identity) = inner.identities.get(&account).cloned() else {
            return Ok(BundleTake::NoIdentity);
        };
        let Some(signed_prekey) = inner.current_signed_prekey(account) else {
            return Ok(BundleTake::NoSignedPreKey);
        };

        let one_time_prekey = inner
            .one_time_prekeys
            .get_mut(&account)
            .and_then(BTreeMap::pop_first)
            .map(|(key_id, public_key)| OneTimePreKey { key_id, public_key });

        Ok(BundleTake::Bundle(PreKeyBundle {
            account,
            identity_key: identity.identity_key,
            registration_id: identity.registration_id,
            signed_prekey,
            one_time_prekey,
        }))
    }

    fn one_time_prekey_count(&self, account: AccountId) -> Result<usize, StorageError> {
        Ok(self.lock()?.one_time_prekeys.get(&account).map_or(0, BTreeMap::len))
    }

    fn delete_account(&self, account: AccountId) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;

        let identity = inner.identities.remove(&account).is_some();
        let signed = inner.signed_prekeys.remove(&account).is_some_and(|m| !m.is_empty());
        let one_time = inner.one_time_prekeys.remove(&account).is_some_and(|m| !m.is_empty());

        Ok(identity || signed || one_time)
    }

    fn upsert_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
        distribution_id: DistributionId,
        sender_key: &SenderKeyBlob,
        now_secs: u64,
    ) -> Result<SenderKeyRecord, StorageError> {
        let mut inner = self.lock()?;

        let iteration = match inner.iterations.get(&(channel, user)) {
            None => 0,
            Some(last) => last.checked_add(1).ok_or_else(|| {
                StorageError::Io(format!("iteration overflow for {channel}/{user}"))
            })?,
        };

        let record = SenderKeyRecord {
            channel,
            user,
            distribution_id,
            sender_key: sender_key.clone(),
            iteration,
            created_at_secs: now_secs,
        };

        inner.iterations.insert((channel, user), iteration);
        inner.sender_keys.entry(channel).or_default().insert(user, record.clone());

        Ok(record)
    }

    fn load_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<Option<SenderKeyRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.sender_keys.get(&channel).and_then(|keys| keys.get(&user)).cloned())
    }

    fn load_sender_keys(&self, channel: ChannelId) -> Result<Vec<SenderKeyRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .sender_keys
            .get(&channel)
            .map(|keys| keys.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_sender_key(&self, channel: ChannelId, user: UserId) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;

        let Some(keys) = inner.sender_keys.get_mut(&channel) else {
            return Ok(false);
        };
        let removed = keys.remove(&user).is_some();
        if keys.is_empty() {
            inner.sender_keys.remove(&channel);
        }

        Ok(removed)
    }

    fn invalidate_channel(
        &self,
        channel: ChannelId,
        now_secs: u64,
    ) -> Result<Invalidation, StorageError> {
        let mut inner = self.lock()?;

        let removed = inner.sender_keys.remove(&channel).map_or(0, |keys| keys.len());

        let rotation = inner.rotations.get(&channel).map_or(0, |mark| mark.rotation) + 1;
        let mark = RotationMark { rotation, invalidated_at_secs: now_secs };
        inner.rotations.insert(channel, mark);

        Ok(Invalidation { removed, mark })
    }

    fn channel_rotation(&self, channel: ChannelId) -> Result<Option<RotationMark>, StorageError> {
        Ok(self.lock()?.rotations.get(&channel).copied())
    }

    fn purge_channel(&self, channel: ChannelId) -> Result<usize, StorageError> {
        let mut inner = self.lock()?;

        let removed = inner.sender_keys.remove(&channel).map_or(0, |keys| keys.len());
        inner.rotations.remove(&channel);
        inner.iterations.retain(|(ch, _), _| *ch != channel);

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use keyhold_core::Signature;
    use uuid::Uuid;

    use super::*;

    fn identity(account: u64) -> IdentityRecord {
        IdentityRecord {
            account: AccountId(account),
            identity_key: PublicKey::from_bytes([account as u8; 32]),
            registration_id: 1,
            updated_at_secs: 0,
        }
    }

    fn spk(key_id: KeyId, created_at_secs: u64) -> SignedPreKey {
        SignedPreKey {
            key_id,
            public_key: PublicKey::from_bytes([key_id as u8; 32]),
            signature: Signature::from_bytes([7; 64]),
            created_at_secs,
        }
    }

    fn opk(key_id: KeyId) -> OneTimePreKey {
        OneTimePreKey { key_id, public_key: PublicKey::from_bytes([key_id as u8; 32]) }
    }

    #[test]
    fn take_bundle_consumes_each_prekey_once() {
        let storage = MemoryStorage::new();
        storage.upsert_bundle(&identity(1), &spk(1, 0), &[opk(1), opk(2)]).unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let BundleTake::Bundle(bundle) = storage.take_bundle(AccountId(1)).unwrap() else {
                panic!("expected bundle");
            };
            seen.push(bundle.one_time_prekey.unwrap().key_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);

        let BundleTake::Bundle(bundle) = storage.take_bundle(AccountId(1)).unwrap() else {
            panic!("expected bundle");
        };
        assert!(bundle.one_time_prekey.is_none());
    }

    #[test]
    fn missing_signed_prekey_consumes_nothing() {
        let storage = MemoryStorage::new();
        storage.upsert_bundle(&identity(1), &spk(1, 0), &[opk(1)]).unwrap();
        storage.clear_signed_prekeys(AccountId(1)).unwrap();

        assert_eq!(storage.take_bundle(AccountId(1)).unwrap(), BundleTake::NoSignedPreKey);
        assert_eq!(storage.one_time_prekey_count(AccountId(1)).unwrap(), 1);
        assert_eq!(storage.take_bundle(AccountId(2)).unwrap(), BundleTake::NoIdentity);
    }

    #[test]
    fn resubmitted_signed_prekey_wins_ties() {
        let storage = MemoryStorage::new();
        storage.upsert_bundle(&identity(1), &spk(1, 10), &[]).unwrap();
        storage.upsert_signed_prekey(AccountId(1), &spk(2, 10)).unwrap();
        assert_eq!(storage.current_signed_prekey(AccountId(1)).unwrap().unwrap().key_id, 2);

        storage.upsert_signed_prekey(AccountId(1), &spk(1, 10)).unwrap();
        assert_eq!(storage.current_signed_prekey(AccountId(1)).unwrap().unwrap().key_id, 1);
    }

    #[test]
    fn iteration_survives_delete_but_not_purge() {
        let storage = MemoryStorage::new();
        let blob = SenderKeyBlob::parse(b"k".to_vec(), 16).unwrap();
        let dist = DistributionId::new(Uuid::from_u128(1));
        let (ch, user) = (ChannelId(1), AccountId(1));

        assert_eq!(storage.upsert_sender_key(ch, user, dist, &blob, 0).unwrap().iteration, 0);
        assert!(storage.delete_sender_key(ch, user).unwrap());
        assert!(!storage.delete_sender_key(ch, user).unwrap());
        assert_eq!(storage.upsert_sender_key(ch, user, dist, &blob, 0).unwrap().iteration, 1);

        assert_eq!(storage.purge_channel(ch).unwrap(), 1);
        assert_eq!(storage.upsert_sender_key(ch, user, dist, &blob, 0).unwrap().iteration, 0);
        assert_eq!(storage.sender_key_count().unwrap(), 1);
    }
}
