//! Legacy (v1) containers
//!
//! Version 1 has no offset table, a 25-byte header and CRC32 checksums:
//! ```text
//! Signature (8) | Version = 1 (4) | Count (4)
//! [Handle u64 | Type u32 | Compression u8 | DecompressedSize u32 |
//!  CompressedSize u32 | CRC32 u32] * count
//! payloads, back to back
//! ```
//! [`upgrade`] rewrites such a container into current-version bytes once,
//! so nothing past the container reader has to know about v1.

use bytes::{Buf, Bytes};

use crate::codec;
use crate::container::ContainerWriter;
use crate::error::{BawError, Result};

use super::{
    compute_token, BlobHeader, Compression, DEFAULT_MAX_BLOB_SIZE, LEGACY_VERSION, PREAMBLE_SIZE,
    SIGNATURE,
};

/// Size of one v1 header record
pub const LEGACY_HEADER_SIZE: usize = 25;

/// v1 per-blob metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyBlobHeader {
    pub handle: u64,
    pub blob_type: u32,
    pub compression: Compression,
    pub decompressed_size: u32,
    pub compressed_size: u32,
    /// CRC32 of the decompressed bytes
    pub crc32: u32,
}

impl LegacyBlobHeader {
    fn parse(buf: &mut &[u8]) -> Result<Self> {
        let handle = buf.get_u64_le();
        let blob_type = buf.get_u32_le();
        let kind = buf.get_u8();
        let decompressed_size = buf.get_u32_le();
        let compressed_size = buf.get_u32_le();
        let crc32 = buf.get_u32_le();

        let compression = Compression::from_u8(kind).ok_or_else(|| {
            BawError::corrupt(format!("v1 blob {} has unknown compression {}", handle, kind))
        })?;

        Ok(Self {
            handle,
            blob_type,
            compression,
            decompressed_size,
            compressed_size,
            crc32,
        })
    }
}

/// Rewrite a complete v1 container as a current-version container
///
/// Every blob is decoded once to check its CRC32 and compute its v2
/// integrity token; the stored payloads are carried over unchanged.
/// Blobs larger than [`DEFAULT_MAX_BLOB_SIZE`] are rejected.
pub fn upgrade(data: &[u8]) -> Result<Vec<u8>> {
    upgrade_with_limit(data, DEFAULT_MAX_BLOB_SIZE)
}

/// [`upgrade`] with an explicit cap on each blob's decompressed size
///
/// A blob announcing more than `max_blob_size` bytes fails with
/// `AllocationFailed` before anything is decoded.
pub fn upgrade_with_limit(data: &[u8], max_blob_size: usize) -> Result<Vec<u8>> {
    if data.len() < PREAMBLE_SIZE as usize {
        return Err(BawError::corrupt("v1 container shorter than its preamble"));
    }
    if &data[0..8] != SIGNATURE {
        return Err(BawError::BadSignature {
            found: data[0..8].to_vec(),
        });
    }

    let mut buf = &data[8..];
    let version = buf.get_u32_le();
    if version != LEGACY_VERSION {
        return Err(BawError::UnsupportedVersion(version));
    }
    let blob_count = buf.get_u32_le() as usize;

    let headers_len = blob_count as u64 * LEGACY_HEADER_SIZE as u64;
    if headers_len > buf.remaining() as u64 {
        return Err(BawError::corrupt(format!(
            "v1 header array for {} blobs runs past end of file",
            blob_count
        )));
    }

    let mut headers = Vec::with_capacity(blob_count);
    for _ in 0..blob_count {
        headers.push(LegacyBlobHeader::parse(&mut buf)?);
    }

    let payloads = Bytes::copy_from_slice(buf);
    let mut position = 0usize;
    let mut writer = ContainerWriter::new();

    for legacy in &headers {
        let end = position + legacy.compressed_size as usize;
        if legacy.compressed_size == 0 || end > payloads.len() {
            return Err(BawError::corrupt(format!(
                "v1 blob {} payload out of bounds",
                legacy.handle
            )));
        }
        let stored = payloads.slice(position..end);
        position = end;

        let requested = legacy.decompressed_size as usize;
        if requested > max_blob_size {
            return Err(BawError::AllocationFailed {
                handle: legacy.handle,
                requested,
            });
        }

        let decoded = codec::decode(legacy.compression, &stored, requested)
        .map_err(|source| BawError::DecompressionFailed {
            handle: legacy.handle,
            source,
        })?;
        if crc32fast::hash(&decoded) != legacy.crc32 {
            return Err(BawError::IntegrityMismatch {
                handle: legacy.handle,
            });
        }

        let header = BlobHeader {
            handle: legacy.handle,
            blob_type: legacy.blob_type,
            compression: legacy.compression,
            encrypted: false,
            decompressed_size: legacy.decompressed_size,
            compressed_size: legacy.compressed_size,
            integrity_token: compute_token(&decoded),
        };
        writer.add_stored(header, stored).map_err(|e| match e {
            BawError::Write(reason) => BawError::CorruptContainer(reason),
            other => other,
        })?;
    }

    tracing::info!(blobs = blob_count, "upgraded v1 container");
    writer.finish()
}
