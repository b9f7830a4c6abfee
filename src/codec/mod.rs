//! Compression Codec
//!
//! Turns stored blob payloads into their decompressed bytes and back.
//!
//! The decompressed size is always known from the blob header, so decoding
//! allocates exactly one buffer of that size and treats any other output
//! length as a failure.

mod cipher;

use std::io::{self, Write};

use crate::error::CodecError;
use crate::format::Compression;

pub use cipher::{apply_keystream, DecryptionKey};

/// Decode `src` into exactly `expected_len` bytes
pub fn decode(kind: Compression, src: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    let output = match kind {
        Compression::Raw => src.to_vec(),
        Compression::Lz4 => lz4_flex::block::decompress(src, expected_len)
            .map_err(|e| CodecError::Lz4(e.to_string()))?,
        Compression::Lzma => {
            let mut input = src;
            let mut output = BoundedWriter::new(expected_len);
            lzma_rs::lzma_decompress(&mut input, &mut output)
                .map_err(|e| CodecError::Lzma(format!("{:?}", e)))?;
            output.into_inner()
        }
    };

    if output.len() != expected_len {
        return Err(CodecError::SizeMismatch {
            expected: expected_len,
            actual: output.len(),
        });
    }

    Ok(output)
}

/// Compress `src` for storage
pub fn encode(kind: Compression, src: &[u8]) -> Result<Vec<u8>, CodecError> {
    match kind {
        Compression::Raw => Ok(src.to_vec()),
        Compression::Lz4 => Ok(lz4_flex::block::compress(src)),
        Compression::Lzma => {
            let mut input = src;
            let mut output = Vec::new();
            lzma_rs::lzma_compress(&mut input, &mut output)
                .map_err(|e| CodecError::Lzma(e.to_string()))?;
            Ok(output)
        }
    }
}

/// Initial reservation for LZMA output; the buffer grows up to the limit
const LZMA_RESERVE: usize = 1024 * 1024;

/// Output sink that refuses to grow past the size announced in the header
struct BoundedWriter {
    buffer: Vec<u8>,
    limit: usize,
}

impl BoundedWriter {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(limit.min(LZMA_RESERVE)),
            limit,
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for BoundedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.buffer.len() + buf.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("output exceeds declared size of {} bytes", self.limit),
            ));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
