//! Blob Type Registry
//!
//! Per-type behavior the loader dispatches to without knowing concrete
//! object types.
//!
//! ## Lifecycle of one blob
//! ```text
//!   decompressed bytes
//!          │
//!          ├──► dependencies()      handles this blob references
//!          │
//!          ├──► instantiate_empty() Skeleton (self-contained data only)
//!          │
//!          └──► finalize()          Skeleton + ResolvedDeps ──► LoadedObject
//!
//!   on failure, anything created so far ──► release()
//! ```
//!
//! The registry is an ordinary value handed to the loader; there is no
//! process-wide registration.

mod object;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BawError, BlobError, Result};

pub use object::{LoadedObject, ReleasedObject, ResolvedDeps, Skeleton};

/// How dependents hold objects of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Reference counted; any number of parents may hold it
    Shared,
    /// Moved into its single parent during that parent's finalize
    Exclusive,
}

/// Caller-supplied parameters passed through to every blob type
#[derive(Clone, Default)]
pub struct LoadParams {
    user: Option<Arc<dyn Any + Send + Sync>>,
}

impl LoadParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a typed parameter value
    pub fn with<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            user: Some(Arc::new(value)),
        }
    }

    /// The attached value, if it is a `T`
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.user.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for LoadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadParams")
            .field("user", &self.user.is_some())
            .finish()
    }
}

/// Behavior of one blob type
pub trait BlobType: Send + Sync {
    /// Human-readable type name (diagnostics only)
    fn name(&self) -> &'static str;

    /// Ownership discipline for dependents of this type
    fn ownership(&self) -> Ownership {
        Ownership::Shared
    }

    /// Handles referenced by this blob, in the order they should load
    ///
    /// Only the fixed header portion of the payload should be inspected;
    /// nothing is resolved yet.
    fn dependencies(&self, bytes: &[u8]) -> std::result::Result<Vec<u64>, BlobError>;

    /// Allocate the object and fill in everything that needs no dependency
    fn instantiate_empty(
        &self,
        bytes: &[u8],
        params: &LoadParams,
    ) -> std::result::Result<Skeleton, BlobError>;

    /// Wire resolved dependencies into the skeleton
    ///
    /// Called once, after every handle returned by `dependencies` has been
    /// finalized.
    fn finalize(
        &self,
        object: &mut Skeleton,
        bytes: &[u8],
        deps: &mut ResolvedDeps,
        params: &LoadParams,
    ) -> std::result::Result<(), BlobError>;

    /// Undo `instantiate_empty`/`finalize` on a failed load
    ///
    /// Must accept skeletons that were never finalized.
    fn release(&self, handle: u64, object: ReleasedObject) {
        let _ = handle;
        drop(object);
    }
}

/// Dispatch table from blob type tag to behavior
#[derive(Default)]
pub struct Registry {
    types: HashMap<u32, Box<dyn BlobType>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under `tag`; each tag may be registered once
    pub fn register(&mut self, tag: u32, blob_type: impl BlobType + 'static) -> Result<()> {
        if self.types.contains_key(&tag) {
            return Err(BawError::Config(format!(
                "blob type {} is already registered",
                tag
            )));
        }
        self.types.insert(tag, Box::new(blob_type));
        Ok(())
    }

    /// Builder-style `register`
    pub fn with(mut self, tag: u32, blob_type: impl BlobType + 'static) -> Result<Self> {
        self.register(tag, blob_type)?;
        Ok(self)
    }

    pub fn get(&self, tag: u32) -> Option<&dyn BlobType> {
        self.types.get(&tag).map(|t| t.as_ref())
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.types.contains_key(&tag)
    }

    /// Registered tags, unordered
    pub fn tags(&self) -> impl Iterator<Item = u32> + '_ {
        self.types.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Hand an object back to its type for cleanup
    pub(crate) fn release(&self, handle: u64, blob_type: u32, object: ReleasedObject) {
        match self.get(blob_type) {
            Some(t) => t.release(handle, object),
            None => drop(object),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .types
            .iter()
            .map(|(tag, t)| (*tag, t.name()))
            .collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("types", &names).finish()
    }
}
