//! Limits for the registry and the coordinator.

/// Bundle Registry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Largest one-time prekey batch accepted in one upload
    pub max_prekey_batch: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_prekey_batch: 100 }
    }
}

/// Rotation Coordinator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Largest sender-key blob accepted, in bytes
    pub max_sender_key_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { max_sender_key_bytes: 16 * 1024 }
    }
}

/// Keyhold configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyholdConfig {
    /// Bundle Registry limits
    pub registry: RegistryConfig,
    /// Rotation Coordinator limits
    pub coordinator: CoordinatorConfig,
}
