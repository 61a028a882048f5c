//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Redb
//! admits one write transaction at a time, which is what makes
//! [`KeyStore::take_bundle`] consume each one-time prekey at most once across
//! threads.

use std::{fmt, path::Path, sync::Arc};

use keyhold_core::{
    AccountId, ChannelId, DistributionId, IdentityRecord, Invalidation, KeyId, OneTimePreKey,
    PreKeyBundle, PublicKey, RotationMark, SenderKeyBlob, SenderKeyRecord, SignedPreKey,
    StorageError, UserId,
};
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{BundleTake, KeyStore, PreKeyInsert};

/// Table: identities
/// Key: account_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded IdentityRecord
const IDENTITIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("identities");

/// Table: signed_prekeys
/// Key: (account_id, key_id) as big-endian bytes [12 bytes]
/// Value: CBOR-encoded StoredSignedPreKey
const SIGNED_PREKEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("signed_prekeys");

/// Table: one_time_prekeys
/// Key: (account_id, key_id) as big-endian bytes [12 bytes]
/// Value: raw public key [32 bytes]
const ONE_TIME_PREKEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("one_time_prekeys");

/// Table: sender_keys
/// Key: (channel_id, user_id) as big-endian bytes [24 bytes]
/// Value: CBOR-encoded SenderKeyRecord
const SENDER_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sender_keys");

/// Table: sender_key_iterations
/// Key: (channel_id, user_id) as big-endian bytes [24 bytes]
/// Value: highest iteration ever issued for the pair
const ITERATIONS: TableDefinition<&[u8], u64> = TableDefinition::new("sender_key_iterations");

/// Table: rotations
/// Key: channel_id as big-endian bytes [16 bytes]
/// Value: CBOR-encoded RotationMark
const ROTATIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("rotations");

/// Table: meta
/// Key: counter name
/// Value: counter
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SIGNED_PREKEY_SEQUENCE: &str = "signed_prekey_sequence";

/// Signed prekey row with its store-wide write sequence.
#[derive(Serialize, Deserialize)]
struct StoredSignedPreKey {
    record: SignedPreKey,
    sequence: u64,
}

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(IDENTITIES).map_err(io)?;
            let _ = txn.open_table(SIGNED_PREKEYS).map_err(io)?;
            let _ = txn.open_table(ONE_TIME_PREKEYS).map_err(io)?;
            let _ = txn.open_table(SENDER_KEYS).map_err(io)?;
            let _ = txn.open_table(ITERATIONS).map_err(io)?;
            let _ = txn.open_table(ROTATIONS).map_err(io)?;
            let _ = txn.open_table(META).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn has_identity(txn: &WriteTransaction, account: AccountId) -> Result<bool, StorageError> {
        let table = txn.open_table(IDENTITIES).map_err(io)?;
        let found = table.get(account_key(account).as_slice()).map_err(io)?.is_some();
        Ok(found)
    }

    fn put_signed_prekey(
        txn: &WriteTransaction,
        account: AccountId,
        signed_prekey: &SignedPreKey,
    ) -> Result<(), StorageError> {
        let sequence = {
            let mut meta = txn.open_table(META).map_err(io)?;
            let next = meta.get(SIGNED_PREKEY_SEQUENCE).map_err(io)?.map_or(0, |v| v.value()) + 1;
            meta.insert(SIGNED_PREKEY_SEQUENCE, next).map_err(io)?;
            next
        };

        let stored = encode(&StoredSignedPreKey { record: signed_prekey.clone(), sequence })?;
        let mut table = txn.open_table(SIGNED_PREKEYS).map_err(io)?;
        table
            .insert(prekey_key(account, signed_prekey.key_id).as_slice(), stored.as_slice())
            .map_err(io)?;

        Ok(())
    }

    fn put_one_time_prekeys(
        txn: &WriteTransaction,
        account: AccountId,
        prekeys: &[OneTimePreKey],
    ) -> Result<PreKeyInsert, StorageError> {
        let mut table = txn.open_table(ONE_TIME_PREKEYS).map_err(io)?;
        let mut insert = PreKeyInsert::default();

        for prekey in prekeys {
            let key = prekey_key(account, prekey.key_id);
            if table.get(key.as_slice()).map_err(io)?.is_some() {
                insert.already_stored.push(prekey.key_id);
                continue;
            }
            table.insert(key.as_slice(), prekey.public_key.as_bytes().as_slice()).map_err(io)?;
            insert.stored.push(prekey.key_id);
        }

        Ok(insert)
    }

    /// Newest signed prekey by (created_at_secs, sequence).
    fn find_current_signed_prekey<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
        account: AccountId,
    ) -> Result<Option<SignedPreKey>, StorageError> {
        let start = prekey_key(account, 0);
        let end = prekey_key(account, KeyId::MAX);

        let mut current: Option<StoredSignedPreKey> = None;
        for result in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (_, value) = result.map_err(io)?;
            let stored: StoredSignedPreKey = decode(value.value())?;

            let newer = current.as_ref().is_none_or(|c| {
                (stored.record.created_at_secs, stored.sequence)
                    > (c.record.created_at_secs, c.sequence)
            });
            if newer {
                current = Some(stored);
            }
        }

        Ok(current.map(|c| c.record))
    }
}

impl KeyStore for RedbStorage {
    fn upsert_bundle(
        &self,
        identity: &IdentityRecord,
        signed_prekey: &SignedPreKey,
        one_time_prekeys: &[OneTimePreKey],
    ) -> Result<PreKeyInsert, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut table = txn.open_table(IDENTITIES).map_err(io)?;
            let bytes = encode(identity)?;
            table.insert(account_key(identity.account).as_slice(), bytes.as_slice()).map_err(io)?;
        }
        Self::put_signed_prekey(&txn, identity.account, signed_prekey)?;
        let insert = Self::put_one_time_prekeys(&txn, identity.account, one_time_prekeys)?;

        txn.commit().map_err(io)?;

        Ok(insert)
    }

    fn upsert_signed_prekey(
        &self,
        account: AccountId,
        signed_prekey: &SignedPreKey,
    ) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        if !Self::has_identity(&txn, account)? {
            return Ok(false);
        }
        Self::put_signed_prekey(&txn, account, signed_prekey)?;

        txn.commit().map_err(io)?;

        Ok(true)
    }

    fn insert_one_time_prekeys(
        &self,
        account: AccountId,
        prekeys: &[OneTimePreKey],
    ) -> Result<Option<PreKeyInsert>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        if !Self::has_identity(&txn, account)? {
            return Ok(None);
        }
        let insert = Self::put_one_time_prekeys(&txn, account, prekeys)?;

        txn.commit().map_err(io)?;

        Ok(Some(insert))
    }

    fn load_identity(&self, account: AccountId) -> Result<Option<IdentityRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(IDENTITIES).map_err(io)?;

        get_cbor(&table, &account_key(account))
    }

    fn current_signed_prekey(
        &self,
        account: AccountId,
    ) -> Result<Option<SignedPreKey>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SIGNED_PREKEYS).map_err(io)?;

        Self::find_current_signed_prekey(&table, account)
    }

    fn take_bundle(&self, account: AccountId) -> Result<BundleTake, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let bundle = {
            let identities = txn.open_table(IDENTITIES).map_err(io)?;
            let Some(identity) =
                get_cbor::<IdentityRecord, _>(&identities, &account_key(account))?
            else {
                return Ok(BundleTake::NoIdentity);
            };

            let signed = txn.open_table(SIGNED_PREKEYS).map_err(io)?;
            let Some(signed_prekey) = Self::find_current_signed_prekey(&signed, account)? else {
                return Ok(BundleTake::NoSignedPreKey);
            };

            let mut pool = txn.open_table(ONE_TIME_PREKEYS).map_err(io)?;
            let start = prekey_key(account, 0);
            let end = prekey_key(account, KeyId::MAX);

            let first = match pool.range(start.as_slice()..=end.as_slice()).map_err(io)?.next() {
                Some(result) => {
                    let (key, value) = result.map_err(io)?;
                    Some((key.value().to_vec(), value.value().to_vec()))
                },
                None => None,
            };

            let one_time_prekey = match first {
                Some((key, value)) => {
                    pool.remove(key.as_slice()).map_err(io)?;
                    let public_key = PublicKey::try_from(value.as_slice())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    Some(OneTimePreKey { key_id: decode_key_id(&key)?, public_key })
                },
                None => None,
            };

            PreKeyBundle {
                account,
                identity_key: identity.identity_key,
                registration_id: identity.registration_id,
                signed_prekey,
                one_time_prekey,
            }
        };

        txn.commit().map_err(io)?;

        Ok(BundleTake::Bundle(bundle))
    }

    fn one_time_prekey_count(&self, account: AccountId) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(ONE_TIME_PREKEYS).map_err(io)?;

        let start = prekey_key(account, 0);
        let end = prekey_key(account, KeyId::MAX);

        let mut count = 0;
        for result in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            result.map_err(io)?;
            count += 1;
        }

        Ok(count)
    }

    fn delete_account(&self, account: AccountId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let removed = {
            let mut identities = txn.open_table(IDENTITIES).map_err(io)?;
            let identity =
                identities.remove(account_key(account).as_slice()).map_err(io)?.is_some();

            let start = prekey_key(account, 0);
            let end = prekey_key(account, KeyId::MAX);

            let mut signed = txn.open_table(SIGNED_PREKEYS).map_err(io)?;
            let signed_removed = remove_range(&mut signed, &start, &end)?;

            let mut pool = txn.open_table(ONE_TIME_PREKEYS).map_err(io)?;
            let pool_removed = remove_range(&mut pool, &start, &end)?;

            identity || signed_removed > 0 || pool_removed > 0
        };

        txn.commit().map_err(io)?;

        Ok(removed)
    }

    fn upsert_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
        distribution_id: DistributionId,
        sender_key: &SenderKeyBlob,
        now_secs: u64,
    ) -> Result<SenderKeyRecord, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let key = member_key(channel, user);

        let record = {
            let mut iterations = txn.open_table(ITERATIONS).map_err(io)?;
            let last = iterations.get(key.as_slice()).map_err(io)?.map(|v| v.value());
            let iteration = match last {
                None => 0,
                Some(last) => last.checked_add(1).ok_or_else(|| {
                    StorageError::Io(format!("iteration overflow for {channel}/{user}"))
                })?,
            };
            iterations.insert(key.as_slice(), iteration).map_err(io)?;

            let record = SenderKeyRecord {
                channel,
                user,
                distribution_id,
                sender_key: sender_key.clone(),
                iteration,
                created_at_secs: now_secs,
            };

            let mut table = txn.open_table(SENDER_KEYS).map_err(io)?;
            let bytes = encode(&record)?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;

            record
        };

        txn.commit().map_err(io)?;

        Ok(record)
    }

    fn load_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<Option<SenderKeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SENDER_KEYS).map_err(io)?;

        get_cbor(&table, &member_key(channel, user))
    }

    fn load_sender_keys(&self, channel: ChannelId) -> Result<Vec<SenderKeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SENDER_KEYS).map_err(io)?;

        let start = member_key(channel, AccountId(0));
        let end = member_key(channel, AccountId(u64::MAX));

        let mut records = Vec::new();
        for result in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (_, value) = result.map_err(io)?;
            records.push(decode(value.value())?);
        }

        Ok(records)
    }

    fn delete_sender_key(&self, channel: ChannelId, user: UserId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let removed = {
            let mut table = txn.open_table(SENDER_KEYS).map_err(io)?;
            table.remove(member_key(channel, user).as_slice()).map_err(io)?.is_some()
        };

        txn.commit().map_err(io)?;

        Ok(removed)
    }

    fn invalidate_channel(
        &self,
        channel: ChannelId,
        now_secs: u64,
    ) -> Result<Invalidation, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let invalidation = {
            let start = member_key(channel, AccountId(0));
            let end = member_key(channel, AccountId(u64::MAX));

            let mut keys = txn.open_table(SENDER_KEYS).map_err(io)?;
            let removed = remove_range(&mut keys, &start, &end)?;

            let mut rotations = txn.open_table(ROTATIONS).map_err(io)?;
            let rotation_key = channel_key(channel);
            let previous: Option<RotationMark> = get_cbor(&rotations, &rotation_key)?;

            let mark = RotationMark {
                rotation: previous.map_or(0, |m| m.rotation) + 1,
                invalidated_at_secs: now_secs,
            };
            let bytes = encode(&mark)?;
            rotations.insert(rotation_key.as_slice(), bytes.as_slice()).map_err(io)?;

            Invalidation { removed, mark }
        };

        txn.commit().map_err(io)?;

        Ok(invalidation)
    }

    fn channel_rotation(&self, channel: ChannelId) -> Result<Option<RotationMark>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(ROTATIONS).map_err(io)?;

        get_cbor(&table, &channel_key(channel))
    }

    fn purge_channel(&self, channel: ChannelId) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let removed = {
            let start = member_key(channel, AccountId(0));
            let end = member_key(channel, AccountId(u64::MAX));

            let mut keys = txn.open_table(SENDER_KEYS).map_err(io)?;
            let removed = remove_range(&mut keys, &start, &end)?;

            let mut iterations = txn.open_table(ITERATIONS).map_err(io)?;
            remove_range(&mut iterations, &start, &end)?;

            let mut rotations = txn.open_table(ROTATIONS).map_err(io)?;
            rotations.remove(channel_key(channel).as_slice()).map_err(io)?;

            removed
        };

        txn.commit().map_err(io)?;

        Ok(removed)
    }
}

fn io(e: impl fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn get_cbor<T, R>(table: &R, key: &[u8]) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key).map_err(io)? {
        Some(value) => Ok(Some(decode(value.value())?)),
        None => Ok(None),
    }
}

/// Remove every key in `start..=end`. Returns the number removed.
fn remove_range<V: redb::Value + 'static>(
    table: &mut Table<'_, &'static [u8], V>,
    start: &[u8],
    end: &[u8],
) -> Result<usize, StorageError> {
    let mut keys = Vec::new();
    for result in table.range(start..=end).map_err(io)? {
        let (key, _) = result.map_err(io)?;
        keys.push(key.value().to_vec());
    }

    for key in &keys {
        table.remove(key.as_slice()).map_err(io)?;
    }

    Ok(keys.len())
}

/// Encode account_id as 8-byte big-endian key.
fn account_key(account: AccountId) -> [u8; 8] {
    account.get().to_be_bytes()
}

/// Encode (account_id, key_id) as 12-byte big-endian key.
///
/// Layout: [account_id: 8 bytes BE][key_id: 4 bytes BE]
/// Lexicographic ordering matches numeric ordering, so an account's prekeys
/// form one contiguous range.
fn prekey_key(account: AccountId, key_id: KeyId) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&account.get().to_be_bytes());
    key[8..].copy_from_slice(&key_id.to_be_bytes());
    key
}

/// Extract the key_id from a prekey key.
fn decode_key_id(key: &[u8]) -> Result<KeyId, StorageError> {
    key.get(8..12)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(KeyId::from_be_bytes)
        .ok_or_else(|| StorageError::Serialization(format!("prekey key has {} bytes", key.len())))
}

/// Encode channel_id as 16-byte big-endian key.
fn channel_key(channel: ChannelId) -> [u8; 16] {
    channel.get().to_be_bytes()
}

/// Encode (channel_id, user_id) as 24-byte big-endian key.
///
/// Layout: [channel_id: 16 bytes BE][user_id: 8 bytes BE]
fn member_key(channel: ChannelId, user: UserId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(&channel.get().to_be_bytes());
    key[16..].copy_from_slice(&user.get().to_be_bytes());
    key
}
