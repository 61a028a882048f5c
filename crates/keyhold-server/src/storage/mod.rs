//! Storage abstraction for Keyhold key material
//!
//! Trait-based abstraction over a transactional store. The trait is
//! synchronous (no async) to maintain a clean synchronous API design, and
//! every method is exactly one transaction.
//!
//! The only operation with atomicity beyond a single-row upsert is
//! [`KeyStore::take_bundle`]: reading the identity and signed prekey and
//! removing one one-time prekey happen in one transaction, so concurrent
//! callers can never be handed the same one-time prekey. Backends achieve this
//! with their native transaction primitive (a write transaction in redb, the
//! table mutex in memory), never with an application-level lock around the
//! trait.

mod chaotic;
mod memory;
mod redb;

use keyhold_core::{
    AccountId, ChannelId, DistributionId, IdentityRecord, Invalidation, KeyId, OneTimePreKey,
    PreKeyBundle, RotationMark, SenderKeyBlob, SenderKeyRecord, SignedPreKey, StorageError,
    UserId,
};

pub use self::{chaotic::ChaoticStorage, memory::MemoryStorage, redb::RedbStorage};

/// Result of inserting a batch of one-time prekeys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreKeyInsert {
    /// Ids newly stored, in input order
    pub stored: Vec<KeyId>,
    /// Ids that were already present and left untouched
    pub already_stored: Vec<KeyId>,
}

/// Result of [`KeyStore::take_bundle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleTake {
    /// Account has no identity record
    NoIdentity,
    /// Identity exists but no signed prekey; nothing was consumed
    NoSignedPreKey,
    /// Bundle assembled; its one-time prekey (if any) has been deleted
    Bundle(PreKeyBundle),
}

/// Storage abstraction for identity keys, prekeys and sender keys
///
/// Must be Clone (shared by the registry and the coordinator), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations
/// typically share internal state via Arc, so clones access the same
/// underlying storage.
pub trait KeyStore: Clone + Send + Sync + 'static {
    /// Upsert identity and signed prekey and insert one-time prekeys, all in
    /// one transaction.
    ///
    /// # Invariants
    ///
    /// - Post: exactly one identity record for the account
    /// - Post: the given signed prekey is the account's current one
    /// - Post: one-time prekeys whose id is already stored are left untouched
    fn upsert_bundle(
        &self,
        identity: &IdentityRecord,
        signed_prekey: &SignedPreKey,
        one_time_prekeys: &[OneTimePreKey],
    ) -> Result<PreKeyInsert, StorageError>;

    /// Upsert a signed prekey keyed by its id. A resubmitted id becomes
    /// current again.
    ///
    /// Returns `false` (and writes nothing) if the account has no identity.
    fn upsert_signed_prekey(
        &self,
        account: AccountId,
        signed_prekey: &SignedPreKey,
    ) -> Result<bool, StorageError>;

    /// Insert one-time prekeys, skipping ids that are already stored.
    ///
    /// Returns `None` (and writes nothing) if the account has no identity.
    fn insert_one_time_prekeys(
        &self,
        account: AccountId,
        prekeys: &[OneTimePreKey],
    ) -> Result<Option<PreKeyInsert>, StorageError>;

    /// Identity record for an account.
    fn load_identity(&self, account: AccountId) -> Result<Option<IdentityRecord>, StorageError>;

    /// Newest signed prekey, by creation time then write order.
    fn current_signed_prekey(
        &self,
        account: AccountId,
    ) -> Result<Option<SignedPreKey>, StorageError>;

    /// Assemble a bundle and consume at most one one-time prekey.
    ///
    /// # Invariants
    ///
    /// - A one-time prekey returned here is deleted in the same transaction
    ///   and is never returned again
    /// - Nothing is consumed unless the bundle is returned
    fn take_bundle(&self, account: AccountId) -> Result<BundleTake, StorageError>;

    /// Unconsumed one-time prekeys for an account.
    fn one_time_prekey_count(&self, account: AccountId) -> Result<usize, StorageError>;

    /// Remove identity, all signed prekeys and all one-time prekeys.
    ///
    /// Returns `true` if anything was removed.
    fn delete_account(&self, account: AccountId) -> Result<bool, StorageError>;

    /// Upsert the sender key for (channel, user), assigning the next
    /// iteration.
    ///
    /// # Invariants
    ///
    /// - First upload for a pair gets iteration 0
    /// - Every later upload gets one more than the highest iteration ever
    ///   issued for the pair, including iterations whose record has since
    ///   been deleted
    fn upsert_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
        distribution_id: DistributionId,
        sender_key: &SenderKeyBlob,
        now_secs: u64,
    ) -> Result<SenderKeyRecord, StorageError>;

    /// Sender key of one member.
    fn load_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<Option<SenderKeyRecord>, StorageError>;

    /// All sender keys of a channel, ordered by user id.
    fn load_sender_keys(&self, channel: ChannelId) -> Result<Vec<SenderKeyRecord>, StorageError>;

    /// Delete one member's sender key. The iteration high-water mark stays.
    ///
    /// Returns `true` if a key was removed.
    fn delete_sender_key(&self, channel: ChannelId, user: UserId) -> Result<bool, StorageError>;

    /// Delete every sender key of the channel and advance its rotation mark.
    ///
    /// Other channels are untouched. Iteration high-water marks stay.
    fn invalidate_channel(
        &self,
        channel: ChannelId,
        now_secs: u64,
    ) -> Result<Invalidation, StorageError>;

    /// Latest rotation mark. `None` if the channel was never invalidated.
    fn channel_rotation(&self, channel: ChannelId) -> Result<Option<RotationMark>, StorageError>;

    /// Terminal channel deletion: sender keys, rotation mark and iteration
    /// high-water marks.
    ///
    /// Returns the number of sender keys removed.
    fn purge_channel(&self, channel: ChannelId) -> Result<usize, StorageError>;
}
