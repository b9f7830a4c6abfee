//! Loaded objects
//!
//! A blob becomes a [`Skeleton`] when instantiated and a [`LoadedObject`]
//! once finalized. Concrete types are recovered by downcasting; the blob
//! type tag travels with the object so the registry can be consulted
//! without knowing the concrete type.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BlobError;

/// An instantiated, not yet finalized object (exclusively owned)
pub type Skeleton = Box<dyn Any + Send + Sync>;

/// A finalized object, reference counted so dependents can share it
#[derive(Clone)]
pub struct LoadedObject {
    handle: u64,
    blob_type: u32,
    value: Arc<dyn Any + Send + Sync>,
}

impl LoadedObject {
    /// Seal a finalized skeleton
    pub fn new(handle: u64, blob_type: u32, skeleton: Skeleton) -> Self {
        Self {
            handle,
            blob_type,
            value: Arc::from(skeleton),
        }
    }

    /// Handle of the blob this object was loaded from
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn blob_type(&self) -> u32 {
        self.blob_type
    }

    /// Borrow the object as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Share the object as `Arc<T>`
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Take the object out as `T` if this is its only reference
    pub fn try_unwrap<T: Any + Send + Sync>(self) -> Result<T, Self> {
        let LoadedObject {
            handle,
            blob_type,
            value,
        } = self;

        match value.downcast::<T>() {
            Ok(typed) => Arc::try_unwrap(typed).map_err(|typed| LoadedObject {
                handle,
                blob_type,
                value: typed,
            }),
            Err(value) => Err(LoadedObject {
                handle,
                blob_type,
                value,
            }),
        }
    }

    /// Whether both refer to the same object instance
    pub fn ptr_eq(&self, other: &LoadedObject) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Number of live references to the object
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}

impl fmt::Debug for LoadedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedObject")
            .field("handle", &self.handle)
            .field("blob_type", &self.blob_type)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// An object handed back to its blob type for cleanup
pub enum ReleasedObject {
    /// Instantiated but never finalized
    Skeleton(Skeleton),
    /// Finalized, but the load it belonged to failed
    Finalized(LoadedObject),
}

impl fmt::Debug for ReleasedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleasedObject::Skeleton(_) => f.write_str("Skeleton(..)"),
            ReleasedObject::Finalized(object) => write!(f, "Finalized({:?})", object),
        }
    }
}

// =============================================================================
// Resolved dependencies
// =============================================================================

/// Finalized dependencies handed to `finalize`, keyed by handle
///
/// Shared dependencies are clones of objects other parents may also hold.
/// Exclusive dependencies are moved in and should be taken with
/// [`ResolvedDeps::take`].
#[derive(Debug, Default)]
pub struct ResolvedDeps {
    objects: HashMap<u64, LoadedObject>,
}

impl ResolvedDeps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a dependency without regard to its type
    pub fn get(&self, handle: u64) -> Result<&LoadedObject, BlobError> {
        self.objects
            .get(&handle)
            .ok_or(BlobError::MissingDependency(handle))
    }

    /// Share a dependency as `Arc<T>`
    pub fn shared<T: Any + Send + Sync>(&self, handle: u64) -> Result<Arc<T>, BlobError> {
        self.get(handle)?
            .downcast::<T>()
            .ok_or(BlobError::DependencyType {
                handle,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Take exclusive ownership of a dependency
    pub fn take<T: Any + Send + Sync>(&mut self, handle: u64) -> Result<T, BlobError> {
        let object = self
            .objects
            .remove(&handle)
            .ok_or(BlobError::MissingDependency(handle))?;

        if object.downcast_ref::<T>().is_none() {
            self.objects.insert(handle, object);
            return Err(BlobError::DependencyType {
                handle,
                expected: std::any::type_name::<T>(),
            });
        }

        match object.try_unwrap::<T>() {
            Ok(value) => Ok(value),
            Err(object) => {
                self.objects.insert(handle, object);
                Err(BlobError::DependencyShared(handle))
            }
        }
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.objects.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub(crate) fn insert(&mut self, handle: u64, object: LoadedObject) {
        self.objects.insert(handle, object);
    }

    /// Dependencies `finalize` left behind
    pub(crate) fn into_remaining(self) -> impl Iterator<Item = (u64, LoadedObject)> {
        self.objects.into_iter()
    }
}
