//! Blob Header
//!
//! Fixed-size record describing one stored blob.

use bytes::{Buf, BufMut};

use crate::error::{BawError, Result};

use super::{HEADER_SIZE, TOKEN_SIZE};

/// BLAKE3 digest of a blob's decompressed bytes
pub type IntegrityToken = [u8; TOKEN_SIZE];

/// Bit of the compression byte marking an encrypted payload
const ENCRYPTED_FLAG: u8 = 0x80;

/// Compute the integrity token for decompressed blob bytes
pub fn compute_token(data: &[u8]) -> IntegrityToken {
    *blake3::hash(data).as_bytes()
}

/// How a blob's payload is compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Compression {
    Raw = 0,
    Lz4 = 1,
    Lzma = 2,
}

impl Compression {
    pub fn from_u8(kind: u8) -> Option<Self> {
        match kind {
            0 => Some(Compression::Raw),
            1 => Some(Compression::Lz4),
            2 => Some(Compression::Lzma),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::Raw => "raw",
            Compression::Lz4 => "lz4",
            Compression::Lzma => "lzma",
        }
    }
}

/// Per-blob metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    /// Unique within a container; the dependency graph node id
    pub handle: u64,
    /// Tag into the blob type registry
    pub blob_type: u32,
    pub compression: Compression,
    /// Payload is encrypted with a caller-supplied key
    pub encrypted: bool,
    pub decompressed_size: u32,
    pub compressed_size: u32,
    /// Digest of the decompressed bytes
    pub integrity_token: IntegrityToken,
}

impl BlobHeader {
    /// Decode a header from exactly `HEADER_SIZE` bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(BawError::corrupt(format!(
                "blob header must be {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let handle = buf.get_u64_le();
        let blob_type = buf.get_u32_le();
        let compression_byte = buf.get_u8();
        let decompressed_size = buf.get_u32_le();
        let compressed_size = buf.get_u32_le();
        let mut integrity_token = [0u8; TOKEN_SIZE];
        buf.copy_to_slice(&mut integrity_token);

        let compression = Compression::from_u8(compression_byte & !ENCRYPTED_FLAG).ok_or_else(
            || {
                BawError::corrupt(format!(
                    "blob {} has unknown compression kind {}",
                    handle,
                    compression_byte & !ENCRYPTED_FLAG
                ))
            },
        )?;

        Ok(Self {
            handle,
            blob_type,
            compression,
            encrypted: compression_byte & ENCRYPTED_FLAG != 0,
            decompressed_size,
            compressed_size,
            integrity_token,
        })
    }

    /// Append the wire form of this header to `buffer`
    pub fn write_to_buffer(&self, buffer: &mut Vec<u8>) {
        buffer.reserve(HEADER_SIZE);
        buffer.put_u64_le(self.handle);
        buffer.put_u32_le(self.blob_type);
        buffer.put_u8(self.compression_byte());
        buffer.put_u32_le(self.decompressed_size);
        buffer.put_u32_le(self.compressed_size);
        buffer.put_slice(&self.integrity_token);
    }

    /// Compression kind and encryption flag as stored on disk
    pub fn compression_byte(&self) -> u8 {
        let flag = if self.encrypted { ENCRYPTED_FLAG } else { 0 };
        self.compression as u8 | flag
    }

    /// Whether `data` matches the stored integrity token
    pub fn verify(&self, data: &[u8]) -> bool {
        compute_token(data) == self.integrity_token
    }
}
