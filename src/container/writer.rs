//! Container Writer
//!
//! Builds current-version containers: compresses, optionally encrypts and
//! hashes each blob, then lays out the offset table, header array and
//! tightly packed payloads.

use std::collections::HashSet;
use std::io::Write;

use bytes::{BufMut, Bytes};

use crate::codec::{self, DecryptionKey};
use crate::error::{BawError, Result};
use crate::format::{
    self, compute_token, BlobHeader, Compression, CURRENT_VERSION, SIGNATURE,
};

/// Builder for `.baw` containers
///
/// Blobs are laid out in the order they are added.
#[derive(Default)]
pub struct ContainerWriter {
    /// Header and stored payload for every blob added so far
    entries: Vec<(BlobHeader, Bytes)>,
    handles: HashSet<u64>,
    /// Running payload size, bounded by the u32 offset table
    payload_len: u64,
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a blob, compressing `data` with `compression`
    pub fn add(
        &mut self,
        handle: u64,
        blob_type: u32,
        data: &[u8],
        compression: Compression,
    ) -> Result<&BlobHeader> {
        self.add_blob(handle, blob_type, data, compression, None)
    }

    /// Add a blob whose stored payload is encrypted with `key`
    pub fn add_encrypted(
        &mut self,
        handle: u64,
        blob_type: u32,
        data: &[u8],
        compression: Compression,
        key: &DecryptionKey,
    ) -> Result<&BlobHeader> {
        self.add_blob(handle, blob_type, data, compression, Some(key))
    }

    fn add_blob(
        &mut self,
        handle: u64,
        blob_type: u32,
        data: &[u8],
        compression: Compression,
        key: Option<&DecryptionKey>,
    ) -> Result<&BlobHeader> {
        if data.is_empty() {
            return Err(BawError::Write(format!("blob {} has no data", handle)));
        }
        let decompressed_size = u32::try_from(data.len()).map_err(|_| {
            BawError::Write(format!("blob {} exceeds 4 GiB", handle))
        })?;

        let mut stored = codec::encode(compression, data)
            .map_err(|e| BawError::Write(format!("blob {}: {}", handle, e)))?;
        if let Some(key) = key {
            codec::apply_keystream(key, handle, &mut stored);
        }

        let header = BlobHeader {
            handle,
            blob_type,
            compression,
            encrypted: key.is_some(),
            decompressed_size,
            compressed_size: 0, // set by add_stored
            integrity_token: compute_token(data),
        };
        self.add_stored(header, Bytes::from(stored))
    }

    /// Add a blob whose payload is already in its stored form
    ///
    /// `header.compressed_size` is taken from `payload`.
    pub(crate) fn add_stored(
        &mut self,
        mut header: BlobHeader,
        payload: Bytes,
    ) -> Result<&BlobHeader> {
        if self.handles.contains(&header.handle) {
            return Err(BawError::Write(format!(
                "duplicate handle {}",
                header.handle
            )));
        }
        if payload.is_empty() || header.decompressed_size == 0 {
            return Err(BawError::Write(format!(
                "blob {} has an empty payload",
                header.handle
            )));
        }

        header.compressed_size = u32::try_from(payload.len()).map_err(|_| {
            BawError::Write(format!("blob {} exceeds 4 GiB", header.handle))
        })?;
        let payload_len = self.payload_len + payload.len() as u64;
        if payload_len > u32::MAX as u64 {
            return Err(BawError::Write(
                "payload section exceeds the 32-bit offset range".to_string(),
            ));
        }

        self.payload_len = payload_len;
        self.handles.insert(header.handle);
        self.entries.push((header, payload));
        let (header, _) = &self.entries[self.entries.len() - 1];
        Ok(header)
    }

    /// Number of blobs added
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lay out the container and return its bytes
    pub fn finish(self) -> Result<Vec<u8>> {
        let blob_count = u32::try_from(self.entries.len())
            .map_err(|_| BawError::Write("too many blobs".to_string()))?;
        let base = format::payload_base(blob_count);

        let mut out = Vec::with_capacity((base + self.payload_len) as usize);
        out.put_slice(SIGNATURE);
        out.put_u32_le(CURRENT_VERSION);
        out.put_u32_le(blob_count);

        let mut offset = 0u32;
        for (header, _) in &self.entries {
            out.put_u32_le(offset);
            offset += header.compressed_size;
        }
        for (header, _) in &self.entries {
            header.write_to_buffer(&mut out);
        }
        debug_assert_eq!(out.len() as u64, base);

        for (_, payload) in &self.entries {
            out.put_slice(payload);
        }

        tracing::debug!(blobs = blob_count, bytes = out.len(), "container written");
        Ok(out)
    }

    /// Lay out the container into `writer`, returning the bytes written
    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<u64> {
        let bytes = self.finish()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(bytes.len() as u64)
    }
}
