//! Production Environment implementation using system time.

use std::time::{SystemTime, UNIX_EPOCH};

use keyhold_core::Environment;

/// Production environment reading the system clock.
///
/// A clock set before the Unix epoch reads as 0 rather than failing the
/// request; signed-prekey ordering then falls back to write order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}
