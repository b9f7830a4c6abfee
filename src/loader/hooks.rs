//! Load hooks
//!
//! The seam the rest of the engine uses to supply decryption keys, plug in an
//! object cache and hear about cached sub-assets.

use std::sync::Arc;

use crate::cache::{CacheKey, ObjectCache};
use crate::codec::DecryptionKey;

/// Caller overrides consulted during a load
///
/// Every method has a no-op default.
pub trait LoadHooks: Send + Sync {
    /// Key to try for an encrypted blob on the given attempt (0-based).
    /// Returning `None` ends the attempts for that blob.
    fn decryption_key(&self, handle: u64, attempt: u32) -> Option<DecryptionKey> {
        let _ = (handle, attempt);
        None
    }

    /// Cache consulted before loading each sub-object
    fn cache(&self) -> Option<&dyn ObjectCache> {
        None
    }

    /// Called after a sub-object has been published to the cache
    fn sub_asset_cached(&self, key: &CacheKey) {
        let _ = key;
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl LoadHooks for NoHooks {}

/// Ready-made hooks: a keyring tried in order, plus an optional cache
#[derive(Default, Clone)]
pub struct StandardHooks {
    keys: Vec<DecryptionKey>,
    cache: Option<Arc<dyn ObjectCache>>,
}

impl StandardHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key; keys are tried in the order they were added
    pub fn with_key(mut self, key: DecryptionKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ObjectCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl LoadHooks for StandardHooks {
    fn decryption_key(&self, _handle: u64, attempt: u32) -> Option<DecryptionKey> {
        self.keys.get(attempt as usize).cloned()
    }

    fn cache(&self) -> Option<&dyn ObjectCache> {
        self.cache.as_deref()
    }

    fn sub_asset_cached(&self, key: &CacheKey) {
        tracing::trace!(%key, "sub-asset cached");
    }
}
