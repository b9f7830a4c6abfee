//! Container Format
//!
//! On-disk layout of `.baw` containers.
//!
//! ## File Format (v2)
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Preamble (16 bytes)                                         │
//! │   Signature "BAWBLOB\0" (8) | Version: u32 (4) | Count (4)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Offset Table (4 * count)                                    │
//! │   [Offset: u32] relative to the payload base                │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Header Array (53 * count)                                   │
//! │   Handle u64 | Type u32 | Compression u8 |                  │
//! │   DecompressedSize u32 | CompressedSize u32 | Token [u8;32] │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Payloads (tightly packed, compressed_size bytes each)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Version 1 containers are upgraded to
//! this layout in memory by [`legacy::upgrade`] before anything else reads
//! them.

mod header;
pub mod legacy;

pub use header::{compute_token, BlobHeader, Compression, IntegrityToken};

/// Signature at the start of every container
pub const SIGNATURE: &[u8; 8] = b"BAWBLOB\0";

/// Current container format version
pub const CURRENT_VERSION: u32 = 2;

/// Oldest version still accepted (upgraded at open time)
pub const LEGACY_VERSION: u32 = 1;

/// Signature (8) + Version (4) + BlobCount (4) = 16 bytes
pub const PREAMBLE_SIZE: u64 = 16;

/// Width of one offset table entry
pub const OFFSET_SIZE: u64 = 4;

/// Size of the integrity token (BLAKE3 digest)
pub const TOKEN_SIZE: usize = 32;

/// Handle (8) + Type (4) + Compression (1) + Sizes (8) + Token (32) = 53 bytes
pub const HEADER_SIZE: usize = 53;

/// Largest decompressed blob accepted unless configured otherwise (256 MB)
pub const DEFAULT_MAX_BLOB_SIZE: usize = 256 * 1024 * 1024;

/// Offset of the first payload byte for a container holding `blob_count` blobs
pub fn payload_base(blob_count: u32) -> u64 {
    PREAMBLE_SIZE + blob_count as u64 * (OFFSET_SIZE + HEADER_SIZE as u64)
}
