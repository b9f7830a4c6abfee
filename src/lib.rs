//! # BAW
//!
//! A typed-blob asset container (`.baw`) and the loader that turns it back
//! into an object graph:
//! - Fixed-size headers with integrity tokens, O(1) access by handle
//! - Raw, LZ4 and LZMA payloads, optionally encrypted
//! - Iterative dependency resolution with bottom-up finalization
//! - Full release of partially loaded objects on any failure
//! - Optional shared object cache across loads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Loader                                  │
//! │        (to_load stack ──► to_finalize queue)                 │
//! └──────┬──────────────────┬───────────────────────┬───────────┘
//!        │                  │                       │
//!        ▼                  ▼                       ▼
//!  ┌───────────┐     ┌─────────────┐         ┌─────────────┐
//!  │ Container │     │  Registry   │         │ ObjectCache │
//!  │  Reader   │     │ (BlobType)  │         │  (hooks)    │
//!  └─────┬─────┘     └─────────────┘         └─────────────┘
//!        │
//!        ▼
//!  ┌───────────┐     ┌─────────────┐
//!  │  Format   │────►│ Codec/Cipher│
//!  │ (headers) │     │             │
//!  └───────────┘     └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod format;
pub mod codec;
pub mod container;
pub mod registry;
pub mod cache;
pub mod loader;
pub mod assets;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BawError, BlobError, CodecError, Result, Stage};
pub use config::LoaderConfig;
pub use format::{BlobHeader, Compression};
pub use codec::DecryptionKey;
pub use container::{Container, ContainerWriter};
pub use registry::{
    BlobType, LoadParams, LoadedObject, Ownership, Registry, ReleasedObject, ResolvedDeps,
    Skeleton,
};
pub use cache::{CacheKey, ObjectCache, SharedCache};
pub use loader::{
    LoadHooks, LoadRequest, LoadStats, Loader, NoHooks, RootSelector, StandardHooks,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
