//! Error types for BAW
//!
//! `BawError` is what every public operation returns. Blob type implementations
//! report the narrower `BlobError`, and the codec reports `CodecError`; the
//! loader wraps both with the handle and stage that failed.

use std::fmt;

use thiserror::Error;

/// Result type alias using BawError
pub type Result<T> = std::result::Result<T, BawError>;

/// Stage of the per-blob pipeline an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Decrypt,
    Decompress,
    Verify,
    Dependencies,
    Instantiate,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Decrypt => "decrypt",
            Stage::Decompress => "decompress",
            Stage::Verify => "verify",
            Stage::Dependencies => "dependencies",
            Stage::Instantiate => "instantiate",
            Stage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Unified error type for BAW operations
#[derive(Debug, Error)]
pub enum BawError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Container Errors
    // -------------------------------------------------------------------------
    #[error("Bad container signature: {found:02x?}")]
    BadSignature { found: Vec<u8> },

    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u32),

    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    #[error("No blob with handle {0} in container")]
    UnknownHandle(u64),

    #[error("Container write failed: {0}")]
    Write(String),

    // -------------------------------------------------------------------------
    // Blob Errors
    // -------------------------------------------------------------------------
    #[error("Integrity mismatch for blob {handle}")]
    IntegrityMismatch { handle: u64 },

    #[error("Decompression failed for blob {handle}: {source}")]
    DecompressionFailed {
        handle: u64,
        #[source]
        source: CodecError,
    },

    #[error("Decryption failed for blob {handle} after {attempts} attempt(s)")]
    DecryptionFailed { handle: u64, attempts: u32 },

    #[error("Unknown blob type {blob_type} for blob {handle}")]
    UnknownBlobType { handle: u64, blob_type: u32 },

    #[error("Malformed blob {handle} ({stage}): {reason}")]
    MalformedBlob {
        handle: u64,
        stage: Stage,
        reason: String,
    },

    #[error("Allocation of {requested} bytes failed for blob {handle}")]
    AllocationFailed { handle: u64, requested: usize },

    // -------------------------------------------------------------------------
    // Graph Errors
    // -------------------------------------------------------------------------
    #[error("Cyclic dependency: blob {via} depends on {handle}, which is still being loaded")]
    CyclicDependency { handle: u64, via: u64 },

    #[error("Blob {handle} is {depth} levels below the root (limit {limit})")]
    DepthLimit { handle: u64, depth: u32, limit: u32 },

    // -------------------------------------------------------------------------
    // Configuration / Runtime Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Load worker panicked: {0}")]
    Worker(String),
}

impl BawError {
    /// Handle of the blob the error is attributed to, if any
    pub fn handle(&self) -> Option<u64> {
        match self {
            BawError::UnknownHandle(handle)
            | BawError::IntegrityMismatch { handle }
            | BawError::DecompressionFailed { handle, .. }
            | BawError::DecryptionFailed { handle, .. }
            | BawError::UnknownBlobType { handle, .. }
            | BawError::MalformedBlob { handle, .. }
            | BawError::AllocationFailed { handle, .. }
            | BawError::CyclicDependency { handle, .. }
            | BawError::DepthLimit { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Per-blob pipeline stage the error was raised in, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BawError::UnknownHandle(_)
            | BawError::UnknownBlobType { .. }
            | BawError::AllocationFailed { .. } => Some(Stage::Read),
            BawError::DecryptionFailed { .. } => Some(Stage::Decrypt),
            BawError::DecompressionFailed { .. } => Some(Stage::Decompress),
            BawError::IntegrityMismatch { .. } => Some(Stage::Verify),
            BawError::CyclicDependency { .. } | BawError::DepthLimit { .. } => {
                Some(Stage::Dependencies)
            }
            BawError::MalformedBlob { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        BawError::CorruptContainer(msg.into())
    }
}

// =============================================================================
// Blob type errors
// =============================================================================

/// Error raised by a registered blob type
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("{0}")]
    Malformed(String),

    #[error("cannot allocate {requested} bytes")]
    AllocationFailed { requested: usize },

    #[error("dependency {0} was not resolved")]
    MissingDependency(u64),

    #[error("dependency {handle} is not a {expected}")]
    DependencyType { handle: u64, expected: &'static str },

    #[error("dependency {0} is still shared and cannot be taken exclusively")]
    DependencyShared(u64),
}

impl BlobError {
    /// Attribute this error to a blob and stage
    pub fn at(self, handle: u64, stage: Stage) -> BawError {
        match self {
            BlobError::AllocationFailed { requested } => {
                BawError::AllocationFailed { handle, requested }
            }
            other => BawError::MalformedBlob {
                handle,
                stage,
                reason: other.to_string(),
            },
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        BlobError::Malformed(msg.into())
    }
}

// =============================================================================
// Codec errors
// =============================================================================

/// Error raised by the compression codec
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("LZ4: {0}")]
    Lz4(String),

    #[error("LZMA: {0}")]
    Lzma(String),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}
