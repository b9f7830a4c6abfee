//! Object Cache
//!
//! Side channel the loader consults before instantiating a sub-object and
//! populates after finalizing one.
//!
//! ## Concurrency contract
//! - Lookups and inserts for the same key are serialized.
//! - The first object inserted for a key wins; later inserts get the
//!   existing object back, so a handle resolves to one identity per process.
//! - [`SharedCache::get_or_load`] runs at most one load per key at a time;
//!   concurrent callers for the same key block until it finishes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::registry::LoadedObject;

/// Cache key: identity of the source container plus the blob handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: Arc<str>,
    pub handle: u64,
}

impl CacheKey {
    pub fn new(source: impl Into<Arc<str>>, handle: u64) -> Self {
        Self {
            source: source.into(),
            handle,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.handle)
    }
}

/// Key/value store for finalized objects shared across loads
pub trait ObjectCache: Send + Sync {
    /// Finished object for `key`, if any
    fn lookup(&self, key: &CacheKey) -> Option<LoadedObject>;

    /// Store `object` under `key` and return the canonical object for it,
    /// which is the previously stored one if another insert got there first
    fn insert(&self, key: CacheKey, object: LoadedObject) -> LoadedObject;
}

/// Slot state for one key
enum Slot {
    Ready(LoadedObject),
    /// A `get_or_load` call is producing this key
    Loading,
}

/// Thread-safe in-memory [`ObjectCache`]
#[derive(Default)]
pub struct SharedCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    ready: Condvar,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached object for `key`, or run `load` to produce it
    ///
    /// While `load` runs, other callers for the same key wait for its result
    /// instead of loading again. If `load` fails the key is freed and one of
    /// the waiters takes over.
    pub fn get_or_load<F>(&self, key: CacheKey, load: F) -> Result<LoadedObject>
    where
        F: FnOnce() -> Result<LoadedObject>,
    {
        {
            let mut slots = self.slots.lock();
            loop {
                let in_flight = match slots.get(&key) {
                    Some(Slot::Ready(object)) => return Ok(object.clone()),
                    Some(Slot::Loading) => true,
                    None => false,
                };
                if !in_flight {
                    slots.insert(key.clone(), Slot::Loading);
                    break;
                }
                self.ready.wait(&mut slots);
            }
        }

        let claim = LoadingClaim {
            cache: self,
            key: &key,
        };
        let object = load()?;
        std::mem::forget(claim);

        Ok(self.insert(key, object))
    }

    /// Drop the finished entry for `key`
    ///
    /// A key still being produced by `get_or_load` is left in place.
    pub fn remove(&self, key: &CacheKey) -> Option<LoadedObject> {
        let mut slots = self.slots.lock();
        if !matches!(slots.get(key), Some(Slot::Ready(_))) {
            return None;
        }
        match slots.remove(key) {
            Some(Slot::Ready(object)) => Some(object),
            _ => None,
        }
    }

    /// Number of finished entries
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every finished entry (in-flight loads are left alone)
    pub fn clear(&self) {
        self.slots
            .lock()
            .retain(|_, slot| matches!(slot, Slot::Loading));
    }
}

impl ObjectCache for SharedCache {
    fn lookup(&self, key: &CacheKey) -> Option<LoadedObject> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(object)) => Some(object.clone()),
            _ => None,
        }
    }

    fn insert(&self, key: CacheKey, object: LoadedObject) -> LoadedObject {
        let mut slots = self.slots.lock();
        if let Some(Slot::Ready(existing)) = slots.get(&key) {
            return existing.clone();
        }
        slots.insert(key, Slot::Ready(object.clone()));
        drop(slots);

        self.ready.notify_all();
        object
    }
}

impl fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCache")
            .field("entries", &self.len())
            .finish()
    }
}

/// Frees a `Loading` slot if the load fails or panics
struct LoadingClaim<'a> {
    cache: &'a SharedCache,
    key: &'a CacheKey,
}

impl Drop for LoadingClaim<'_> {
    fn drop(&mut self) {
        let mut slots = self.cache.slots.lock();
        if matches!(slots.get(self.key), Some(Slot::Loading)) {
            slots.remove(self.key);
        }
        drop(slots);
        self.cache.ready.notify_all();
    }
}
