//! Stock blob types
//!
//! A vertex buffer, a bone hierarchy and a mesh that depends on both.
//! Used by the CLI, the benches and anyone who wants a ready-made registry.

mod buffer;
mod mesh;
mod skeleton;

use crate::container::ContainerWriter;
use crate::error::Result;
use crate::format::Compression;
use crate::registry::Registry;

pub use buffer::{VertexBuffer, VertexBufferType};
pub use mesh::{Bounds, Mesh, MeshOptions, MeshType, NO_SKELETON};
pub use skeleton::{Bone, BoneHierarchy, BoneHierarchyType};

// Type tags
pub const VERTEX_BUFFER: u32 = 1;
pub const BONE_HIERARCHY: u32 = 2;
pub const MESH: u32 = 3;

/// Handles used by [`demo_container`]
pub const DEMO_ROOT: u64 = 1;
pub const DEMO_VERTEX_BUFFER: u64 = 2;
pub const DEMO_SKELETON: u64 = 3;

/// Registry with every stock type registered under its tag
pub fn stock_registry() -> Result<Registry> {
    Registry::new()
        .with(VERTEX_BUFFER, VertexBufferType)?
        .with(BONE_HIERARCHY, BoneHierarchyType)?
        .with(MESH, MeshType)
}

/// Container with one vertex buffer and one skeleton shared by `meshes` meshes
///
/// The first mesh is [`DEMO_ROOT`]; the others get handles 100, 101, ...
pub fn demo_container(compression: Compression, meshes: usize) -> Result<Vec<u8>> {
    let positions: Vec<[f32; 3]> = (0..64)
        .map(|i| {
            let t = i as f32 / 8.0;
            [t.cos(), t.sin(), t * 0.25]
        })
        .collect();
    let vb = VertexBuffer::from_positions(&positions);

    let hierarchy = BoneHierarchy {
        bones: ["root", "spine", "neck", "head"]
            .iter()
            .enumerate()
            .map(|(i, name)| Bone {
                name: name.to_string(),
                parent: i.checked_sub(1).map(|p| p as u16),
                translation: [0.0, 0.5 * i as f32, 0.0],
            })
            .collect(),
    };
    let hierarchy_bytes = hierarchy.encode().map_err(|e| crate::BawError::Write(e.to_string()))?;

    let indices: Vec<u32> = (0..62).flat_map(|i| [i, i + 1, i + 2]).collect();

    let mut writer = ContainerWriter::new();
    writer.add(DEMO_VERTEX_BUFFER, VERTEX_BUFFER, &vb.encode(), compression)?;
    writer.add(DEMO_SKELETON, BONE_HIERARCHY, &hierarchy_bytes, compression)?;
    for i in 0..meshes.max(1) {
        let handle = if i == 0 { DEMO_ROOT } else { 99 + i as u64 };
        let payload = Mesh::encode(DEMO_VERTEX_BUFFER, Some(DEMO_SKELETON), &indices);
        writer.add(handle, MESH, &payload, compression)?;
    }
    writer.finish()
}
