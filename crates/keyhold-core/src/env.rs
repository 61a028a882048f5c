//! Environment abstraction for deterministic testing.
//!
//! Decouples record timestamps from the system clock. Production uses the
//! server's `SystemEnv`; tests use [`ManualEnv`] and advance time explicitly.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Source of wall-clock time for record timestamps.
///
/// # Invariants
///
/// - `wall_clock_secs()` should not go backwards. Signed-prekey ordering
///   tolerates it (ties and regressions fall back to write order) but
///   timestamps become misleading.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current Unix time in seconds.
    fn wall_clock_secs(&self) -> u64;
}

/// Manually driven clock. Clone shares the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualEnv {
    secs: Arc<AtomicU64>,
}

impl ManualEnv {
    /// Clock starting at `secs`.
    pub fn at(secs: u64) -> Self {
        Self { secs: Arc::new(AtomicU64::new(secs)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Environment for ManualEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_env_advances_shared_clock() {
        let env = ManualEnv::at(100);
        let other = env.clone();

        env.advance(5);
        assert_eq!(other.wall_clock_secs(), 105);

        other.set(7);
        assert_eq!(env.wall_clock_secs(), 7);
    }
}
