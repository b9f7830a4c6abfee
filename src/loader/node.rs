//! Blob nodes
//!
//! Transient per-blob state: the header plus the decompressed bytes, which
//! live until the blob's object has been finalized.

use bytes::Bytes;

use crate::codec;
use crate::config::LoaderConfig;
use crate::error::{BawError, Result};
use crate::format::BlobHeader;

use super::hooks::LoadHooks;

/// A blob being loaded
#[derive(Debug)]
pub struct BlobNode {
    pub header: BlobHeader,
    /// Decompressed payload
    bytes: Bytes,
    /// Distance from the load root
    pub hierarchy_depth: u32,
    /// Whether the bytes were checked against the integrity token
    pub validated: bool,
}

impl BlobNode {
    /// Turn stored bytes into a verified, decompressed node
    ///
    /// Encrypted payloads are decrypted with the keys `hooks` offers, one
    /// attempt at a time, until one decompresses and verifies.
    pub fn materialize(
        header: BlobHeader,
        stored: Bytes,
        depth: u32,
        hooks: &dyn LoadHooks,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let handle = header.handle;
        let requested = header.decompressed_size as usize;
        if requested > config.max_blob_size {
            return Err(BawError::AllocationFailed { handle, requested });
        }

        let (bytes, validated) = if header.encrypted {
            (decrypt(&header, &stored, hooks, config)?, true)
        } else {
            let bytes = decompress(&header, &stored)?;
            if config.verify_integrity && !header.verify(&bytes) {
                return Err(BawError::IntegrityMismatch { handle });
            }
            (bytes, config.verify_integrity)
        };

        Ok(Self {
            header,
            bytes: Bytes::from(bytes),
            hierarchy_depth: depth,
            validated,
        })
    }

    pub fn handle(&self) -> u64 {
        self.header.handle
    }

    /// Decompressed payload
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn decompress(header: &BlobHeader, stored: &[u8]) -> Result<Vec<u8>> {
    codec::decode(
        header.compression,
        stored,
        header.decompressed_size as usize,
    )
    .map_err(|source| BawError::DecompressionFailed {
        handle: header.handle,
        source,
    })
}

/// Try keys until one yields bytes matching the integrity token
fn decrypt(
    header: &BlobHeader,
    stored: &[u8],
    hooks: &dyn LoadHooks,
    config: &LoaderConfig,
) -> Result<Vec<u8>> {
    let handle = header.handle;
    let mut attempts = 0;

    for attempt in 0..config.max_decryption_attempts {
        let Some(key) = hooks.decryption_key(handle, attempt) else {
            break;
        };
        attempts += 1;

        let mut buf = stored.to_vec();
        codec::apply_keystream(&key, handle, &mut buf);

        match decompress(header, &buf) {
            Ok(bytes) if header.verify(&bytes) => {
                tracing::debug!(handle, attempt, "blob decrypted");
                return Ok(bytes);
            }
            Ok(_) => tracing::warn!(handle, attempt, "decryption key rejected: integrity mismatch"),
            Err(e) => tracing::warn!(handle, attempt, error = %e, "decryption key rejected"),
        }
    }

    Err(BawError::DecryptionFailed { handle, attempts })
}
