//! Keyhold server.
//!
//! Server-side custody of end-to-end-encryption key material: prekey bundles
//! for one-to-one session bootstrap and sender keys for multi-member channels,
//! with mandatory whole-channel rotation on every membership change.
//!
//! # Architecture
//!
//! Every operation is a synchronous, stateless request against a shared
//! [`KeyStore`]. Components hold no in-process state beyond their store
//! handle, so any number of instances may run against one database. All
//! atomicity comes from the store's transactions.
//!
//! # Components
//!
//! - [`BundleRegistry`]: identity keys, signed prekeys, one-time prekeys
//! - [`RotationCoordinator`]: sender keys, invalidation, rotation status
//! - [`KeyApi`]: wire-typed facade over both for an RPC/HTTP layer
//! - [`storage`]: [`MemoryStorage`], [`RedbStorage`], [`ChaoticStorage`]
//! - [`SystemEnv`]: production clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod bundle_registry;
mod config;
mod error;
mod rotation_coordinator;
pub mod storage;
mod system_env;

pub use api::KeyApi;
pub use bundle_registry::BundleRegistry;
pub use config::{CoordinatorConfig, KeyholdConfig, RegistryConfig};
pub use error::ServerError;
pub use rotation_coordinator::RotationCoordinator;
pub use storage::{BundleTake, ChaoticStorage, KeyStore, MemoryStorage, PreKeyInsert, RedbStorage};
pub use system_env::SystemEnv;
