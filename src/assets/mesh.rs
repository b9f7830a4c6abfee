//! Meshes
//!
//! Payload layout:
//! ```text
//! [vertex_buffer: u64][skeleton: u64 (0 = none)][index_count: u32][indices: u32 * index_count]
//! ```
//! The vertex buffer and skeleton are dependencies, shared between every
//! mesh that names them.

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::BlobError;
use crate::registry::{BlobType, LoadParams, ResolvedDeps, Skeleton};

use super::buffer::VertexBuffer;
use super::skeleton::BoneHierarchy;

const PREFIX_SIZE: usize = 20;

/// Handle value meaning "no skeleton"
pub const NO_SKELETON: u64 = 0;

/// Per-load mesh options, passed through [`LoadParams`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshOptions {
    /// Compute an axis-aligned bounding box during finalize
    pub compute_bounds: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Indexed triangle mesh
#[derive(Debug)]
pub struct Mesh {
    pub vertex_buffer_handle: u64,
    pub skeleton_handle: Option<u64>,
    pub indices: Vec<u32>,
    vertex_buffer: Option<Arc<VertexBuffer>>,
    skeleton: Option<Arc<BoneHierarchy>>,
    bounds: Option<Bounds>,
}

impl Mesh {
    /// Encode a mesh payload
    pub fn encode(vertex_buffer: u64, skeleton: Option<u64>, indices: &[u32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX_SIZE + indices.len() * 4);
        out.put_u64_le(vertex_buffer);
        out.put_u64_le(skeleton.unwrap_or(NO_SKELETON));
        out.put_u32_le(indices.len() as u32);
        for index in indices {
            out.put_u32_le(*index);
        }
        out
    }

    pub fn vertex_buffer(&self) -> Option<&Arc<VertexBuffer>> {
        self.vertex_buffer.as_ref()
    }

    pub fn skeleton(&self) -> Option<&Arc<BoneHierarchy>> {
        self.skeleton.as_ref()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Parse only the fixed prefix: the two dependency handles
fn read_prefix(mut bytes: &[u8]) -> Result<(u64, Option<u64>, u32), BlobError> {
    if bytes.len() < PREFIX_SIZE {
        return Err(BlobError::malformed("mesh shorter than its prefix"));
    }
    let vertex_buffer = bytes.get_u64_le();
    let skeleton = match bytes.get_u64_le() {
        NO_SKELETON => None,
        handle => Some(handle),
    };
    let index_count = bytes.get_u32_le();
    Ok((vertex_buffer, skeleton, index_count))
}

fn compute_bounds(indices: &[u32], vb: &VertexBuffer) -> Option<Bounds> {
    let mut positions = indices.iter().filter_map(|i| vb.position(*i));
    let first = positions.next()?;
    let mut bounds = Bounds {
        min: first,
        max: first,
    };
    for p in positions {
        for axis in 0..3 {
            bounds.min[axis] = bounds.min[axis].min(p[axis]);
            bounds.max[axis] = bounds.max[axis].max(p[axis]);
        }
    }
    Some(bounds)
}

/// Blob type for [`Mesh`]
pub struct MeshType;

impl BlobType for MeshType {
    fn name(&self) -> &'static str {
        "mesh"
    }

    fn dependencies(&self, bytes: &[u8]) -> Result<Vec<u64>, BlobError> {
        let (vertex_buffer, skeleton, _) = read_prefix(bytes)?;
        Ok(std::iter::once(vertex_buffer).chain(skeleton).collect())
    }

    fn instantiate_empty(&self, bytes: &[u8], _params: &LoadParams) -> Result<Skeleton, BlobError> {
        let (vertex_buffer_handle, skeleton_handle, index_count) = read_prefix(bytes)?;
        let mut body = &bytes[PREFIX_SIZE..];

        let expected = (index_count as usize)
            .checked_mul(4)
            .ok_or_else(|| BlobError::malformed("index data size overflows"))?;
        if body.len() != expected {
            return Err(BlobError::malformed(format!(
                "expected {} index bytes, found {}",
                expected,
                body.len()
            )));
        }

        let mut indices = Vec::new();
        indices
            .try_reserve_exact(index_count as usize)
            .map_err(|_| BlobError::AllocationFailed { requested: expected })?;
        while body.has_remaining() {
            indices.push(body.get_u32_le());
        }

        Ok(Box::new(Mesh {
            vertex_buffer_handle,
            skeleton_handle,
            indices,
            vertex_buffer: None,
            skeleton: None,
            bounds: None,
        }))
    }

    fn finalize(
        &self,
        object: &mut Skeleton,
        _bytes: &[u8],
        deps: &mut ResolvedDeps,
        params: &LoadParams,
    ) -> Result<(), BlobError> {
        let mesh = object
            .downcast_mut::<Mesh>()
            .ok_or_else(|| BlobError::malformed("skeleton is not a mesh"))?;

        let vertex_buffer = deps.shared::<VertexBuffer>(mesh.vertex_buffer_handle)?;
        if let Some(bad) = mesh.indices.iter().find(|i| **i >= vertex_buffer.vertex_count) {
            return Err(BlobError::malformed(format!(
                "index {} out of range for {} vertices",
                bad, vertex_buffer.vertex_count
            )));
        }

        if let Some(handle) = mesh.skeleton_handle {
            mesh.skeleton = Some(deps.shared::<BoneHierarchy>(handle)?);
        }

        let options = params.get::<MeshOptions>().copied().unwrap_or_default();
        if options.compute_bounds {
            mesh.bounds = compute_bounds(&mesh.indices, &vertex_buffer);
        }
        mesh.vertex_buffer = Some(vertex_buffer);
        Ok(())
    }
}
