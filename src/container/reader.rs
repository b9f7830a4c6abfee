//! Container Reader
//!
//! Opens a container, validates its structure and provides O(1) access to
//! the stored (still compressed) bytes of any blob by handle.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use bytes::{Buf, Bytes};

use crate::error::{BawError, Result};
use crate::format::{
    self, legacy, BlobHeader, CURRENT_VERSION, DEFAULT_MAX_BLOB_SIZE, HEADER_SIZE, LEGACY_VERSION,
    OFFSET_SIZE, PREAMBLE_SIZE, SIGNATURE,
};

/// A random-access byte source a container can be read from
pub trait BlobSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> BlobSource for T {}

/// Where payload bytes come from
enum Source {
    /// Seek and read per blob
    Stream(Box<dyn BlobSource>),
    /// Whole container in memory; blob bytes are zero-copy slices
    Memory(Bytes),
}

/// Structural metadata read from the preamble, offset table and header array
struct Layout {
    offsets: Vec<u32>,
    headers: Vec<BlobHeader>,
}

/// An open, validated container
pub struct Container {
    source: Source,
    /// Version found on disk (1 if the container was upgraded on open)
    version: u32,
    offsets: Vec<u32>,
    headers: Vec<BlobHeader>,
    /// Handle → position in `headers`/`offsets`
    index: HashMap<u64, usize>,
    payload_base: u64,
    file_size: u64,
}

impl Container {
    /// Open a container from any seekable byte source
    ///
    /// Fails with `BadSignature`, `UnsupportedVersion` or `CorruptContainer`;
    /// a container is never partially accepted.
    pub fn open<S: Read + Seek + Send + 'static>(source: S) -> Result<Self> {
        Self::open_with_limit(source, DEFAULT_MAX_BLOB_SIZE)
    }

    /// Like [`Container::open`], capping the blobs decoded while upgrading
    /// a version 1 container at `max_blob_size` bytes
    pub fn open_with_limit<S: Read + Seek + Send + 'static>(
        mut source: S,
        max_blob_size: usize,
    ) -> Result<Self> {
        let file_size = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;

        let version = read_preamble_version(&mut source, file_size)?;
        match version {
            CURRENT_VERSION => {
                let layout = read_layout(&mut source, file_size)?;
                Self::build(Source::Stream(Box::new(source)), version, layout, file_size)
            }
            LEGACY_VERSION => {
                let mut data = Vec::with_capacity(file_size as usize);
                source.seek(SeekFrom::Start(0))?;
                source.read_to_end(&mut data)?;
                Self::open_upgraded(&data, max_blob_size)
            }
            other => Err(BawError::UnsupportedVersion(other)),
        }
    }

    /// Open a container file from disk
    pub fn open_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file))
    }

    /// Open a container held in memory
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::from_bytes_with_limit(data, DEFAULT_MAX_BLOB_SIZE)
    }

    /// In-memory counterpart of [`Container::open_with_limit`]
    pub fn from_bytes_with_limit(data: impl Into<Bytes>, max_blob_size: usize) -> Result<Self> {
        let data: Bytes = data.into();
        let file_size = data.len() as u64;

        let mut cursor = Cursor::new(&data[..]);
        let version = read_preamble_version(&mut cursor, file_size)?;
        match version {
            CURRENT_VERSION => {
                let layout = read_layout(&mut cursor, file_size)?;
                Self::build(Source::Memory(data.clone()), version, layout, file_size)
            }
            LEGACY_VERSION => Self::open_upgraded(&data, max_blob_size),
            other => Err(BawError::UnsupportedVersion(other)),
        }
    }

    fn open_upgraded(legacy_bytes: &[u8], max_blob_size: usize) -> Result<Self> {
        let upgraded = Bytes::from(legacy::upgrade_with_limit(legacy_bytes, max_blob_size)?);
        let file_size = upgraded.len() as u64;
        let layout = {
            let mut cursor = Cursor::new(&upgraded[..]);
            read_preamble_version(&mut cursor, file_size)?;
            read_layout(&mut cursor, file_size)?
        };
        Self::build(Source::Memory(upgraded), LEGACY_VERSION, layout, file_size)
    }

    fn build(source: Source, version: u32, layout: Layout, file_size: u64) -> Result<Self> {
        let mut index = HashMap::with_capacity(layout.headers.len());
        for (i, header) in layout.headers.iter().enumerate() {
            if index.insert(header.handle, i).is_some() {
                return Err(BawError::corrupt(format!(
                    "duplicate handle {}",
                    header.handle
                )));
            }
        }

        let container = Self {
            source,
            version,
            payload_base: format::payload_base(layout.headers.len() as u32),
            offsets: layout.offsets,
            headers: layout.headers,
            index,
            file_size,
        };
        container.validate_layout()?;

        tracing::debug!(
            version = container.version,
            blobs = container.headers.len(),
            file_size = container.file_size,
            "container opened"
        );
        Ok(container)
    }

    /// Check every structural invariant of the container
    ///
    /// - sizes are non-zero
    /// - the first payload starts at offset 0
    /// - each payload ends exactly where the next begins (no gaps, no overlap)
    /// - the last payload ends inside the file
    pub fn validate_layout(&self) -> Result<()> {
        let mut expected_offset = 0u64;

        for (i, (header, &offset)) in self.headers.iter().zip(&self.offsets).enumerate() {
            if header.compressed_size == 0 || header.decompressed_size == 0 {
                return Err(BawError::corrupt(format!(
                    "blob {} has a zero size",
                    header.handle
                )));
            }
            if offset as u64 != expected_offset {
                return Err(BawError::corrupt(format!(
                    "blob {} (index {}) starts at offset {}, expected {}",
                    header.handle, i, offset, expected_offset
                )));
            }
            expected_offset = offset as u64 + header.compressed_size as u64;
        }

        let end = self.payload_base + expected_offset;
        if end > self.file_size {
            return Err(BawError::corrupt(format!(
                "payloads end at byte {}, past end of file ({} bytes)",
                end, self.file_size
            )));
        }

        Ok(())
    }

    /// Read the stored bytes of a blob
    ///
    /// Returns exactly `compressed_size` bytes. In-memory containers return a
    /// slice sharing the container buffer.
    pub fn raw_bytes(&mut self, handle: u64) -> Result<Bytes> {
        let range = self
            .blob_range(handle)
            .ok_or(BawError::UnknownHandle(handle))?;

        match &mut self.source {
            Source::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            Source::Stream(reader) => {
                reader.seek(SeekFrom::Start(range.start))?;
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                reader.read_exact(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Absolute byte range of a blob's payload in the file
    pub fn blob_range(&self, handle: u64) -> Option<Range<u64>> {
        let &i = self.index.get(&handle)?;
        let start = self.payload_base + self.offsets[i] as u64;
        Some(start..start + self.headers[i].compressed_size as u64)
    }

    /// Header of the blob with `handle`
    pub fn header(&self, handle: u64) -> Option<&BlobHeader> {
        self.index.get(&handle).map(|&i| &self.headers[i])
    }

    /// All headers in file order
    pub fn headers(&self) -> &[BlobHeader] {
        &self.headers
    }

    /// Offset table (relative to the payload base)
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.index.contains_key(&handle)
    }

    /// Number of blobs
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// On-disk version this container was opened from
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether the container was upgraded from an older version on open
    pub fn was_upgraded(&self) -> bool {
        self.version != CURRENT_VERSION
    }

    pub fn payload_base(&self) -> u64 {
        self.payload_base
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Read the signature and version; leaves the reader positioned at blob_count
fn read_preamble_version<R: Read>(reader: &mut R, file_size: u64) -> Result<u32> {
    if file_size < PREAMBLE_SIZE {
        let mut found = vec![0u8; file_size.min(SIGNATURE.len() as u64) as usize];
        reader.read_exact(&mut found)?;
        if found.as_slice() != &SIGNATURE[..found.len()] {
            return Err(BawError::BadSignature { found });
        }
        return Err(BawError::corrupt(format!(
            "file is {} bytes, shorter than the {}-byte preamble",
            file_size, PREAMBLE_SIZE
        )));
    }

    let mut preamble = [0u8; 12];
    reader.read_exact(&mut preamble)?;
    if &preamble[0..8] != SIGNATURE {
        return Err(BawError::BadSignature {
            found: preamble[0..8].to_vec(),
        });
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&preamble[8..12]);
    Ok(u32::from_le_bytes(version))
}

/// Read blob_count, the offset table and the header array
fn read_layout<R: Read>(reader: &mut R, file_size: u64) -> Result<Layout> {
    let mut count = [0u8; 4];
    reader.read_exact(&mut count)?;
    let blob_count = u32::from_le_bytes(count);

    // Bound the table by the file before allocating for it
    let table_end = format::payload_base(blob_count);
    if table_end > file_size {
        return Err(BawError::corrupt(format!(
            "tables for {} blobs need {} bytes, file has {}",
            blob_count, table_end, file_size
        )));
    }

    let table_len = blob_count as usize * (OFFSET_SIZE as usize + HEADER_SIZE);
    let mut table = vec![0u8; table_len];
    reader.read_exact(&mut table)?;

    let (offset_bytes, header_bytes) = table.split_at(blob_count as usize * OFFSET_SIZE as usize);
    let mut offset_buf = offset_bytes;
    let offsets = (0..blob_count).map(|_| offset_buf.get_u32_le()).collect();
    let headers = header_bytes
        .chunks_exact(HEADER_SIZE)
        .map(BlobHeader::from_bytes)
        .collect::<Result<Vec<_>>>()?;

    Ok(Layout { offsets, headers })
}
