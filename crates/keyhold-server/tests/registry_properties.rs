//! Property tests for the Bundle Registry
//!
//! Random batches with repeated ids and malformed keys:
//! - Stored ids are exactly the unique well-formed ids not already held
//! - Every submitted entry is either stored or reported as skipped
//! - Draining the pool hands out each stored id exactly once

use std::collections::{BTreeSet, HashSet};

use keyhold_core::{AccountId, ManualEnv, PreKeyUpload, SignedPreKeyUpload, SkipReason};
use keyhold_server::{BundleRegistry, MemoryStorage, RegistryConfig};
use proptest::prelude::*;

const ACCOUNT: AccountId = AccountId(11);

/// Small id space so batches collide with themselves and with each other.
fn arb_prekey() -> impl Strategy<Value = PreKeyUpload> {
    (0u32..40, prop_oneof![4 => Just(32usize), 1 => 0usize..64])
        .prop_map(|(key_id, len)| PreKeyUpload { key_id, public_key: vec![0x5A; len] })
}

fn arb_batch() -> impl Strategy<Value = Vec<PreKeyUpload>> {
    prop::collection::vec(arb_prekey(), 0..50)
}

fn registry() -> BundleRegistry<MemoryStorage, ManualEnv> {
    let registry =
        BundleRegistry::new(MemoryStorage::new(), ManualEnv::at(1_000), RegistryConfig::default());
    let signed = SignedPreKeyUpload { key_id: 1, public_key: vec![1; 32], signature: vec![2; 64] };
    registry.upload_bundle(ACCOUNT, &[3; 32], 1, &signed, &[]).unwrap();
    registry
}

#[test]
fn prop_stored_ids_are_unique_valid_ids() {
    proptest!(|(batches in prop::collection::vec(arb_batch(), 1..5))| {
        let registry = registry();
        let mut held: BTreeSet<u32> = BTreeSet::new();

        for batch in &batches {
            let report = registry.upload_pre_keys(ACCOUNT, batch).unwrap();

            let mut expected = BTreeSet::new();
            let mut seen = HashSet::new();
            for upload in batch {
                if upload.public_key.len() == 32
                    && seen.insert(upload.key_id)
                    && !held.contains(&upload.key_id)
                {
                    expected.insert(upload.key_id);
                }
            }

            let stored: BTreeSet<u32> = report.stored.iter().copied().collect();
            prop_assert_eq!(stored.len(), report.stored.len());
            prop_assert_eq!(&stored, &expected);
            prop_assert_eq!(report.stored.len() + report.skipped.len(), batch.len());
            prop_assert_eq!(report.is_complete(), report.skipped.is_empty());

            for skipped in &report.skipped {
                if let SkipReason::AlreadyStored = skipped.reason {
                    prop_assert!(held.contains(&skipped.key_id));
                }
            }

            held.extend(stored);
            prop_assert_eq!(registry.pre_key_count(ACCOUNT).unwrap(), held.len());
        }
    });
}

#[test]
fn prop_drain_hands_out_each_id_once() {
    proptest!(|(batch in arb_batch())| {
        let registry = registry();
        let report = registry.upload_pre_keys(ACCOUNT, &batch).unwrap();

        let mut drained = Vec::new();
        while let Some(prekey) = registry.get_bundle(ACCOUNT).unwrap().one_time_prekey {
            drained.push(prekey.key_id);
        }

        let mut stored = report.stored.clone();
        stored.sort_unstable();
        // Lowest id first.
        prop_assert_eq!(&drained, &stored);
        prop_assert_eq!(registry.pre_key_count(ACCOUNT).unwrap(), 0);
    });
}
