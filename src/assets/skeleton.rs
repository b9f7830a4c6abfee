//! Bone hierarchies
//!
//! The payload is a bincode-encoded [`BoneHierarchy`]. Parents must come
//! before their children.

use serde::{Deserialize, Serialize};

use crate::error::BlobError;
use crate::registry::{BlobType, LoadParams, ResolvedDeps, Skeleton};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    /// Index of the parent bone; `None` for a root bone
    pub parent: Option<u16>,
    pub translation: [f32; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneHierarchy {
    pub bones: Vec<Bone>,
}

impl BoneHierarchy {
    pub fn encode(&self) -> Result<Vec<u8>, BlobError> {
        bincode::serialize(self).map_err(|e| BlobError::malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BlobError> {
        let hierarchy: BoneHierarchy =
            bincode::deserialize(bytes).map_err(|e| BlobError::malformed(e.to_string()))?;
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    fn validate(&self) -> Result<(), BlobError> {
        if self.bones.len() > u16::MAX as usize {
            return Err(BlobError::malformed("too many bones"));
        }
        for (index, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent as usize >= index {
                    return Err(BlobError::malformed(format!(
                        "bone {} ({}) has parent {} that does not precede it",
                        index, bone.name, parent
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of bones between `index` and its root
    ///
    /// `None` if `index` is out of range or its parent chain does not reach
    /// a root (dangling or cyclic parents in an unvalidated hierarchy).
    pub fn depth_of(&self, index: usize) -> Option<usize> {
        let mut bone = self.bones.get(index)?;
        for depth in 0..self.bones.len() {
            match bone.parent {
                None => return Some(depth),
                Some(parent) => bone = self.bones.get(parent as usize)?,
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

/// Blob type for [`BoneHierarchy`]; a leaf
pub struct BoneHierarchyType;

impl BlobType for BoneHierarchyType {
    fn name(&self) -> &'static str {
        "bone_hierarchy"
    }

    fn dependencies(&self, _bytes: &[u8]) -> Result<Vec<u64>, BlobError> {
        Ok(Vec::new())
    }

    fn instantiate_empty(&self, bytes: &[u8], _params: &LoadParams) -> Result<Skeleton, BlobError> {
        Ok(Box::new(BoneHierarchy::decode(bytes)?))
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
