//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations before they reach the inner
//! store. Used to check that a failed call leaves no partial state behind: an
//! injected failure must look exactly like a transaction that never started.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use keyhold_core::{
    AccountId, ChannelId, DistributionId, IdentityRecord, Invalidation, OneTimePreKey,
    RotationMark, SenderKeyBlob, SenderKeyRecord, SignedPreKey, StorageError, UserId,
};

use super::{BundleTake, KeyStore, PreKeyInsert};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with [`StorageError::Io`] based on a configured failure rate. Clones share
/// the RNG and the operation counter.
#[derive(Clone)]
pub struct ChaoticStorage<S: KeyStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
    failure_count: Arc<AtomicUsize>,
}

/// Linear congruential generator, reproducible from its seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: KeyStore> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper with a fixed default seed.
    ///
    /// `failure_rate` is clamped to [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            failure_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Number of operations that were failed on purpose.
    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let roll = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next();
        if roll < self.failure_rate {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }

        Ok(())
    }
}

impl<S: KeyStore> KeyStore for ChaoticStorage<S> {
    fn upsert_bundle(
        &self,
        identity: &IdentityRecord,
        signed_prekey: &SignedPreKey,
        one_time_prekeys: &[OneTimePreKey],
    ) -> Result<PreKeyInsert, StorageError> {
        self.inject()?;
        self.inner.upsert_bundle(identity, signed_prekey, one_time_prekeys)
    }

    fn upsert_signed_prekey(
        &self,
        account: AccountId,
        signed_prekey: &SignedPreKey,
    ) -> Result<bool, StorageError> {
        self.inject()?;
        self.inner.upsert_signed_prekey(account, signed_prekey)
    }

    fn insert_one_time_prekeys(
        &self,
        account: AccountId,
        prekeys: &[OneTimePreKey],
    ) -> Result<Option<PreKeyInsert>, StorageError> {
        self.inject()?;
        self.inner.insert_one_time_prekeys(account, prekeys)
    }

    fn load_identity(&self, account: AccountId) -> Result<Option<IdentityRecord>, StorageError> {
        self.inject()?;
        self.inner.load_identity(account)
    }

    fn current_signed_prekey(
        &self,
        account: AccountId,
    ) -> Result<Option<SignedPreKey>, StorageError> {
        self.inject()?;
        self.inner.current_signed_prekey(account)
    }

    fn take_bundle(&self, account: AccountId) -> Result<BundleTake, StorageError> {
        self.inject()?;
        self.inner.take_bundle(account)
    }

    fn one_time_prekey_count(&self, account: AccountId) -> Result<usize, StorageError> {
        self.inject()?;
        self.inner.one_time_prekey_count(account)
    }

    fn delete_account(&self, account: AccountId) -> Result<bool, StorageError> {
        self.inject()?;
        self.inner.delete_account(account)
    }

    fn upsert_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
        distribution_id: DistributionId,
        sender_key: &SenderKeyBlob,
        now_secs: u64,
    ) -> Result<SenderKeyRecord, StorageError> {
        self.inject()?;
        self.inner.upsert_sender_key(channel, user, distribution_id, sender_key, now_secs)
    }

    fn load_sender_key(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<Option<SenderKeyRecord>, StorageError> {
        self.inject()?;
        self.inner.load_sender_key(channel, user)
    }

    fn load_sender_keys(&self, channel: ChannelId) -> Result<Vec<SenderKeyRecord>, StorageError> {
        self.inject()?;
        self.inner.load_sender_keys(channel)
    }

    fn delete_sender_key(&self, channel: ChannelId, user: UserId) -> Result<bool, StorageError> {
        self.inject()?;
        self.inner.delete_sender_key(channel, user)
    }

    fn invalidate_channel(
        &self,
        channel: ChannelId,
        now_secs: u64,
    ) -> Result<Invalidation, StorageError> {
        self.inject()?;
        self.inner.invalidate_channel(channel, now_secs)
    }

    fn channel_rotation(&self, channel: ChannelId) -> Result<Option<RotationMark>, StorageError> {
        self.inject()?;
        self.inner.channel_rotation(channel)
    }

    fn purge_channel(&self, channel: ChannelId) -> Result<usize, StorageError> {
        self.inject()?;
        self.inner.purge_channel(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn zero_rate_never_fails() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        for account in 0..100 {
            storage.load_identity(AccountId(account)).unwrap();
        }
        assert_eq!(storage.operation_count(), 100);
        assert_eq!(storage.failure_count(), 0);
    }

    #[test]
    fn full_rate_always_fails() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 1.0);
        let err = storage.purge_channel(ChannelId(1)).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(storage.failure_count(), 1);
    }

    #[test]
    fn same_seed_same_failures() {
        let a = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);
        let b = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);

        let run = |s: &ChaoticStorage<MemoryStorage>| -> Vec<bool> {
            (0..64).map(|i| s.one_time_prekey_count(AccountId(i)).is_ok()).collect()
        };
        assert_eq!(run(&a), run(&b));
    }
}
