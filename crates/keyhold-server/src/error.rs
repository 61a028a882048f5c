//! Server error types.

use keyhold_core::{KeyError, StorageError};
use thiserror::Error;

/// Errors surfaced by the `keyhold-admin` binary and server setup.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (bad arguments, unusable database path).
    ///
    /// Fatal; fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage could not be opened or failed outside a key operation.
    ///
    /// May be transient (I/O) or fatal (corrupted values).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A registry or coordinator operation failed.
    ///
    /// See `KeyError::class` for how callers should react.
    #[error("key operation failed: {0}")]
    Key(#[from] KeyError),
}
