//! Keyhold operator tool.
//!
//! Inspects and maintains a Keyhold redb database. Request traffic goes
//! through [`keyhold_server::KeyApi`] inside the host service; this binary is
//! for operators.
//!
//! # Usage
//!
//! ```bash
//! keyhold-admin --db keys.redb prekey-count 42
//! keyhold-admin --db keys.redb invalidate-channel 0x2a
//! RUST_LOG=debug keyhold-admin --db keys.redb delete-account 42
//! ```

#![allow(clippy::print_stdout, reason = "Command output goes to stdout")]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keyhold_core::{AccountId, ChannelId, StaticMembership};
use keyhold_server::{
    BundleRegistry, CoordinatorConfig, KeyStore, RedbStorage, RegistryConfig, RotationCoordinator,
    ServerError, SystemEnv,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keyhold key store administration
#[derive(Parser, Debug)]
#[command(name = "keyhold-admin")]
#[command(about = "Inspect and maintain a Keyhold key store")]
#[command(version)]
struct Args {
    /// Path to the redb database
    #[arg(long, default_value = "keyhold.redb")]
    db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the number of unconsumed one-time prekeys
    PrekeyCount {
        /// Account id
        account: u64,
    },
    /// Remove identity, signed prekeys and one-time prekeys of an account
    DeleteAccount {
        /// Account id
        account: u64,
    },
    /// Delete every sender key of a channel and advance its rotation
    InvalidateChannel {
        /// Channel id (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_channel)]
        channel: u128,
    },
    /// Terminally remove a channel's sender keys and iteration history
    PurgeChannel {
        /// Channel id (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_channel)]
        channel: u128,
    },
    /// Print a channel's rotation counter
    ChannelRotation {
        /// Channel id (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_channel)]
        channel: u128,
    },
}

fn parse_channel(value: &str) -> Result<u128, String> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid channel id {value:?}: {e}"))
}

fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if !args.db.exists() {
        return Err(ServerError::Config(format!("database {} does not exist", args.db.display())));
    }

    tracing::debug!(db = %args.db.display(), "opening key store");
    let storage = RedbStorage::open(&args.db)?;
    let env = SystemEnv::new();

    let registry = BundleRegistry::new(storage.clone(), env, RegistryConfig::default());
    // Operator actions never consult membership; an empty table suffices.
    let coordinator = RotationCoordinator::new(
        storage.clone(),
        StaticMembership::new(),
        env,
        CoordinatorConfig::default(),
    );

    match args.command {
        Command::PrekeyCount { account } => {
            println!("{}", registry.pre_key_count(AccountId(account))?);
        },
        Command::DeleteAccount { account } => {
            let removed = registry.delete_account_keys(AccountId(account))?;
            println!("{}", if removed { "deleted" } else { "nothing to delete" });
        },
        Command::InvalidateChannel { channel } => {
            let invalidation = coordinator.invalidate_channel(ChannelId(channel))?;
            println!(
                "removed {} sender keys, rotation {}",
                invalidation.removed, invalidation.mark.rotation
            );
        },
        Command::PurgeChannel { channel } => {
            let removed = coordinator.purge_channel(ChannelId(channel))?;
            println!("removed {removed} sender keys");
        },
        Command::ChannelRotation { channel } => {
            match storage.channel_rotation(ChannelId(channel))? {
                Some(mark) => {
                    println!("rotation {} at {}", mark.rotation, mark.invalidated_at_secs);
                },
                None => println!("never rotated"),
            }
        },
    }

    Ok(())
}
