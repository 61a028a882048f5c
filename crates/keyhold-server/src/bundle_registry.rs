//! Bundle Registry: identity keys, signed prekeys and one-time prekeys.
//!
//! Stores the public key material peers need for an X3DH-style session
//! bootstrap and hands it out with at-most-once consumption of one-time
//! prekeys.
//!
//! # Upload tolerance
//!
//! Identity key and signed prekey are required for any session, so a
//! malformed one fails the whole upload. One-time prekeys are disposable:
//! malformed entries and repeated ids are skipped and listed in the returned
//! [`UploadReport`] instead.
//!
//! # Consumption
//!
//! [`BundleRegistry::get_bundle`] delegates to [`KeyStore::take_bundle`],
//! which reads and consumes in one storage transaction. There is no
//! in-process lock here; concurrent registries sharing a store (or separate
//! processes sharing a database) get the same guarantee.

use keyhold_core::{
    AccountId, Environment, IdentityRecord, KeyError, PreKeyBundle, PreKeyUpload, PublicKey,
    SignedPreKey, SignedPreKeyUpload, SkipReason, SkippedPreKey, UploadReport, partition_pre_keys,
};

use crate::{
    config::RegistryConfig,
    storage::{BundleTake, KeyStore, PreKeyInsert},
};

/// Registry of prekey bundles.
///
/// Stateless apart from its store handle; clone freely.
#[derive(Clone)]
pub struct BundleRegistry<S: KeyStore, E: Environment> {
    storage: S,
    env: E,
    config: RegistryConfig,
}

impl<S: KeyStore, E: Environment> BundleRegistry<S, E> {
    /// Create a registry over `storage`.
    pub fn new(storage: S, env: E, config: RegistryConfig) -> Self {
        Self { storage, env, config }
    }

    /// Registry limits.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Underlying store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Upload identity key, signed prekey and a one-time prekey batch.
    ///
    /// All writes happen in one transaction. Re-uploading overwrites the
    /// identity in place and refreshes a signed prekey with the same id.
    ///
    /// # Errors
    ///
    /// - `BatchTooLarge` if `one_time_prekeys` exceeds the configured ceiling
    /// - `InvalidKeyMaterial` if the identity key or signed prekey is
    ///   malformed
    /// - `Storage` on backend failure (nothing is written)
    pub fn upload_bundle(
        &self,
        account: AccountId,
        identity_key: &[u8],
        registration_id: u32,
        signed_prekey: &SignedPreKeyUpload,
        one_time_prekeys: &[PreKeyUpload],
    ) -> Result<UploadReport, KeyError> {
        self.check_batch(one_time_prekeys.len())?;

        let now = self.env.wall_clock_secs();
        let identity = IdentityRecord {
            account,
            identity_key: PublicKey::parse("identity_key", identity_key)?,
            registration_id,
            updated_at_secs: now,
        };
        let signed_prekey = signed_prekey.validate(now)?;
        let (valid, skipped) = partition_pre_keys(one_time_prekeys);

        let insert = self.storage.upsert_bundle(&identity, &signed_prekey, &valid)?;
        let report = build_report(insert, skipped);

        tracing::info!(
            %account,
            registration_id,
            signed_prekey_id = signed_prekey.key_id,
            stored = report.stored.len(),
            skipped = report.skipped.len(),
            "bundle uploaded"
        );
        log_skips(account, &report);

        Ok(report)
    }

    /// Hand out a bundle for `account`, consuming one one-time prekey.
    ///
    /// The bundle carries the newest signed prekey. Once the one-time pool is
    /// exhausted the bundle comes back without one; the session is still
    /// viable.
    ///
    /// # Errors
    ///
    /// - `NoKeysUploaded` if the account has no identity key or no signed
    ///   prekey (nothing is consumed)
    /// - `Storage` on backend failure (nothing is consumed)
    pub fn get_bundle(&self, account: AccountId) -> Result<PreKeyBundle, KeyError> {
        match self.storage.take_bundle(account)? {
            BundleTake::NoIdentity | BundleTake::NoSignedPreKey => {
                tracing::debug!(%account, "bundle requested for account without keys");
                Err(KeyError::NoKeysUploaded(account))
            },
            BundleTake::Bundle(bundle) => {
                match &bundle.one_time_prekey {
                    Some(prekey) => {
                        tracing::debug!(
                            %account,
                            one_time_prekey_id = prekey.key_id,
                            "bundle served"
                        );
                    },
                    None => {
                        tracing::warn!(
                            %account,
                            "one-time prekeys exhausted, serving bundle without one"
                        );
                    },
                }
                Ok(bundle)
            },
        }
    }

    /// Replenish one-time prekeys.
    ///
    /// Ids already stored are left untouched and reported as skipped.
    ///
    /// # Errors
    ///
    /// - `BatchTooLarge` above the configured ceiling
    /// - `NoKeysUploaded` if the account has no identity yet
    /// - `Storage` on backend failure
    pub fn upload_pre_keys(
        &self,
        account: AccountId,
        pre_keys: &[PreKeyUpload],
    ) -> Result<UploadReport, KeyError> {
        self.check_batch(pre_keys.len())?;

        let (valid, skipped) = partition_pre_keys(pre_keys);
        let insert = self
            .storage
            .insert_one_time_prekeys(account, &valid)?
            .ok_or(KeyError::NoKeysUploaded(account))?;
        let report = build_report(insert, skipped);

        tracing::debug!(
            %account,
            stored = report.stored.len(),
            skipped = report.skipped.len(),
            "one-time prekeys uploaded"
        );
        log_skips(account, &report);

        Ok(report)
    }

    /// Unconsumed one-time prekeys. Zero for unknown accounts.
    pub fn pre_key_count(&self, account: AccountId) -> Result<usize, KeyError> {
        let count = self.storage.one_time_prekey_count(account)?;
        tracing::debug!(%account, count, "prekey count");
        Ok(count)
    }

    /// Rotate (or refresh) the signed prekey.
    ///
    /// The uploaded key becomes current. Earlier signed prekeys are retained
    /// but never served again unless resubmitted.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial` if malformed
    /// - `NoKeysUploaded` if the account has no identity yet
    pub fn update_signed_pre_key(
        &self,
        account: AccountId,
        signed_prekey: &SignedPreKeyUpload,
    ) -> Result<SignedPreKey, KeyError> {
        let signed_prekey = signed_prekey.validate(self.env.wall_clock_secs())?;

        if !self.storage.upsert_signed_prekey(account, &signed_prekey)? {
            return Err(KeyError::NoKeysUploaded(account));
        }

        tracing::info!(%account, signed_prekey_id = signed_prekey.key_id, "signed prekey updated");

        Ok(signed_prekey)
    }

    /// Remove every key the account has uploaded.
    ///
    /// Returns `false` if there was nothing to remove.
    pub fn delete_account_keys(&self, account: AccountId) -> Result<bool, KeyError> {
        let removed = self.storage.delete_account(account)?;
        tracing::info!(%account, removed, "account keys deleted");
        Ok(removed)
    }

    fn check_batch(&self, len: usize) -> Result<(), KeyError> {
        if len > self.config.max_prekey_batch {
            return Err(KeyError::BatchTooLarge { len, max: self.config.max_prekey_batch });
        }
        Ok(())
    }
}

fn build_report(insert: PreKeyInsert, mut skipped: Vec<SkippedPreKey>) -> UploadReport {
    skipped.extend(
        insert
            .already_stored
            .into_iter()
            .map(|key_id| SkippedPreKey { key_id, reason: SkipReason::AlreadyStored }),
    );
    UploadReport { stored: insert.stored, skipped }
}

fn log_skips(account: AccountId, report: &UploadReport) {
    for skip in &report.skipped {
        match &skip.reason {
            SkipReason::Malformed(reason) => {
                tracing::warn!(
                    %account,
                    key_id = skip.key_id,
                    %reason,
                    "skipped malformed one-time prekey"
                );
            },
            SkipReason::DuplicateInBatch | SkipReason::AlreadyStored => {
                tracing::debug!(
                    %account,
                    key_id = skip.key_id,
                    reason = ?skip.reason,
                    "skipped one-time prekey"
                );
            },
        }
    }
}
