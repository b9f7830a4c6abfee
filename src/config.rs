//! Configuration for the BAW loader
//!
//! Centralized configuration with sensible defaults.

use crate::format::DEFAULT_MAX_BLOB_SIZE;

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------
    /// Check every unencrypted blob against its integrity token.
    /// Encrypted blobs are always checked, since that is how a key is accepted.
    pub verify_integrity: bool,

    // -------------------------------------------------------------------------
    // Encryption
    // -------------------------------------------------------------------------
    /// Upper bound on decryption keys tried per encrypted blob
    pub max_decryption_attempts: u32,

    // -------------------------------------------------------------------------
    // Resource Limits
    // -------------------------------------------------------------------------
    /// Largest decompressed blob the loader will allocate (in bytes)
    pub max_blob_size: usize,

    /// Deepest dependency chain accepted below the root; deeper blobs fail
    /// the load with `DepthLimit`
    pub max_depth: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            max_decryption_attempts: 4,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            max_depth: 256,
        }
    }
}

impl LoaderConfig {
    /// Create a new config builder
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }
}

/// Builder for LoaderConfig
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Enable or disable integrity checks on unencrypted blobs
    pub fn verify_integrity(mut self, enabled: bool) -> Self {
        self.config.verify_integrity = enabled;
        self
    }

    /// Set how many decryption keys are tried per blob
    pub fn max_decryption_attempts(mut self, attempts: u32) -> Self {
        self.config.max_decryption_attempts = attempts;
        self
    }

    /// Set the largest decompressed blob size (in bytes)
    pub fn max_blob_size(mut self, size: usize) -> Self {
        self.config.max_blob_size = size;
        self
    }

    /// Set the deepest accepted dependency chain
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
