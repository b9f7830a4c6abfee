//! Vertex buffers
//!
//! Payload layout:
//! ```text
//! [stride: u32][vertex_count: u32][data: stride * vertex_count bytes]
//! ```
//! When `stride >= 12` the first 12 bytes of each vertex are an `f32x3`
//! position.

use bytes::{Buf, BufMut};

use crate::error::BlobError;
use crate::registry::{BlobType, LoadParams, ResolvedDeps, Skeleton};

const PREFIX_SIZE: usize = 8;
const POSITION_SIZE: usize = 12;

/// Interleaved vertex data, shared by every mesh that references it
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBuffer {
    pub stride: u32,
    pub vertex_count: u32,
    pub data: Vec<u8>,
}

impl VertexBuffer {
    /// Buffer holding only positions (stride 12)
    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        let mut data = Vec::with_capacity(positions.len() * POSITION_SIZE);
        for p in positions {
            for c in p {
                data.put_f32_le(*c);
            }
        }
        Self {
            stride: POSITION_SIZE as u32,
            vertex_count: positions.len() as u32,
            data,
        }
    }

    /// Position of vertex `index`, if the layout carries one
    pub fn position(&self, index: u32) -> Option<[f32; 3]> {
        let stride = self.stride as usize;
        if stride < POSITION_SIZE || index >= self.vertex_count {
            return None;
        }
        let start = index as usize * stride;
        let mut raw = &self.data[start..start + POSITION_SIZE];
        Some([raw.get_f32_le(), raw.get_f32_le(), raw.get_f32_le()])
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX_SIZE + self.data.len());
        out.put_u32_le(self.stride);
        out.put_u32_le(self.vertex_count);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, BlobError> {
        if bytes.len() < PREFIX_SIZE {
            return Err(BlobError::malformed("vertex buffer shorter than its prefix"));
        }
        let stride = bytes.get_u32_le();
        let vertex_count = bytes.get_u32_le();
        if stride == 0 {
            return Err(BlobError::malformed("vertex stride is zero"));
        }

        let expected = (stride as usize)
            .checked_mul(vertex_count as usize)
            .ok_or_else(|| BlobError::malformed("vertex data size overflows"))?;
        if bytes.len() != expected {
            return Err(BlobError::malformed(format!(
                "expected {} bytes of vertex data, found {}",
                expected,
                bytes.len()
            )));
        }

        Ok(Self {
            stride,
            vertex_count,
            data: bytes.to_vec(),
        })
    }
}

/// Blob type for [`VertexBuffer`]; a leaf
pub struct VertexBufferType;

impl BlobType for VertexBufferType {
    fn name(&self) -> &'static str {
        "vertex_buffer"
    }

    fn dependencies(&self, _bytes: &[u8]) -> Result<Vec<u64>, BlobError> {
        Ok(Vec::new())
    }

    fn instantiate_empty(&self, bytes: &[u8], _params: &LoadParams) -> Result<Skeleton, BlobError> {
        Ok(Box::new(VertexBuffer::decode(bytes)?))
    }

    fn finalize(
        &self,
        _object: &mut Skeleton,
        _bytes: &[u8],
        _deps: &mut ResolvedDeps,
        _params: &LoadParams,
    ) -> Result<(), BlobError> {
        Ok(())
    }
}
