//! Shared helpers for integration tests
//!
//! A recording blob type whose payload names its own handle and its
//! dependencies:
//! ```text
//! [id: u64][dep_count: u32][deps: u64 * dep_count][data ...]
//! ```

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use baw::{
    BlobError, BlobType, Compression, ContainerWriter, LoadParams, Ownership, Registry,
    ReleasedObject, ResolvedDeps, Skeleton,
};
use bytes::{Buf, BufMut};
use parking_lot::Mutex;

// =============================================================================
// Type Tags
// =============================================================================

pub const NODE: u32 = 10;
pub const FAIL_INSTANTIATE: u32 = 11;
pub const FAIL_FINALIZE: u32 = 12;
pub const EXCLUSIVE: u32 = 13;
/// Shared type whose finalize ignores its dependencies
pub const PASSIVE: u32 = 14;

// =============================================================================
// Recorder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Instantiate(u64),
    Finalize(u64),
    Release(u64),
}

/// Log of every lifecycle call plus a count of live objects
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    live: AtomicUsize,
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn select(&self, pick: impl Fn(&Event) -> Option<u64>) -> Vec<u64> {
        self.events.lock().iter().filter_map(pick).collect()
    }

    pub fn instantiated(&self) -> Vec<u64> {
        self.select(|e| match e {
            Event::Instantiate(h) => Some(*h),
            _ => None,
        })
    }

    pub fn finalized(&self) -> Vec<u64> {
        self.select(|e| match e {
            Event::Finalize(h) => Some(*h),
            _ => None,
        })
    }

    pub fn released(&self) -> Vec<u64> {
        self.select(|e| match e {
            Event::Release(h) => Some(*h),
            _ => None,
        })
    }

    /// Objects created and not yet dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Recording Blob Type
// =============================================================================

/// Object produced by [`RecordingType`]
#[derive(Debug)]
pub struct Node {
    pub id: u64,
    pub dep_handles: Vec<u64>,
    pub data: Vec<u8>,
    /// Shared dependencies, wired in finalize
    pub shared: Vec<Arc<Node>>,
    /// Exclusive dependencies, moved in during finalize
    pub owned: Vec<Node>,
    recorder: Arc<Recorder>,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.recorder.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RecordingType {
    recorder: Arc<Recorder>,
    ownership: Ownership,
    fail_instantiate: bool,
    fail_finalize: bool,
    wires_deps: bool,
}

fn parse(bytes: &[u8]) -> Result<(u64, Vec<u64>, &[u8]), BlobError> {
    let mut buf = bytes;
    if buf.len() < 12 {
        return Err(BlobError::malformed("node payload too short"));
    }
    let id = buf.get_u64_le();
    let count = buf.get_u32_le() as usize;
    if buf.len() < count * 8 {
        return Err(BlobError::malformed("dependency list truncated"));
    }
    let deps = (0..count).map(|_| buf.get_u64_le()).collect();
    Ok((id, deps, buf))
}

impl BlobType for RecordingType {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }

    fn dependencies(&self, bytes: &[u8]) -> Result<Vec<u64>, BlobError> {
        parse(bytes).map(|(_, deps, _)| deps)
    }

    fn instantiate_empty(&self, bytes: &[u8], _params: &LoadParams) -> Result<Skeleton, BlobError> {
        let (id, dep_handles, data) = parse(bytes)?;
        if self.fail_instantiate {
            return Err(BlobError::malformed("instantiate refused"));
        }
        self.recorder.push(Event::Instantiate(id));
        self.recorder.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Node {
            id,
            dep_handles,
            data: data.to_vec(),
            shared: Vec::new(),
            owned: Vec::new(),
            recorder: Arc::clone(&self.recorder),
        }))
    }

    fn finalize(
        &self,
        object: &mut Skeleton,
        _bytes: &[u8],
        deps: &mut ResolvedDeps,
        _params: &LoadParams,
    ) -> Result<(), BlobError> {
        let node = object
            .downcast_mut::<Node>()
            .ok_or_else(|| BlobError::malformed("not a node"))?;
        if self.fail_finalize {
            return Err(BlobError::malformed("finalize refused"));
        }

        let wired = if self.wires_deps { &node.dep_handles[..] } else { &[] };
        for &handle in wired {
            if deps.get(handle)?.blob_type() == EXCLUSIVE {
                node.owned.push(deps.take::<Node>(handle)?);
            } else {
                node.shared.push(deps.shared::<Node>(handle)?);
            }
        }
        self.recorder.push(Event::Finalize(node.id));
        Ok(())
    }

    fn release(&self, handle: u64, object: ReleasedObject) {
        self.recorder.push(Event::Release(handle));
        drop(object);
    }
}

/// Registry with every recording type, sharing one recorder
pub fn recording_registry() -> (Registry, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let make = |ownership, fail_instantiate, fail_finalize| RecordingType {
        recorder: Arc::clone(&recorder),
        ownership,
        fail_instantiate,
        fail_finalize,
        wires_deps: true,
    };

    let mut registry = Registry::new();
    registry.register(NODE, make(Ownership::Shared, false, false)).unwrap();
    registry.register(FAIL_INSTANTIATE, make(Ownership::Shared, true, false)).unwrap();
    registry.register(FAIL_FINALIZE, make(Ownership::Shared, false, true)).unwrap();
    registry.register(EXCLUSIVE, make(Ownership::Exclusive, false, false)).unwrap();
    let passive = RecordingType {
        wires_deps: false,
        ..make(Ownership::Shared, false, false)
    };
    registry.register(PASSIVE, passive).unwrap();
    (registry, recorder)
}

// =============================================================================
// Container Builders
// =============================================================================

pub fn node_payload(id: u64, deps: &[u64], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u64_le(id);
    out.put_u32_le(deps.len() as u32);
    for dep in deps {
        out.put_u64_le(*dep);
    }
    out.extend_from_slice(data);
    out
}

/// One blob description: (handle, type tag, dependencies)
pub type BlobDef<'a> = (u64, u32, &'a [u64]);

/// Container of recording nodes, all stored with `compression`
pub fn build_container(blobs: &[BlobDef<'_>], compression: Compression) -> Vec<u8> {
    let mut writer = ContainerWriter::new();
    for &(handle, tag, deps) in blobs {
        let data = format!("node-{}", handle).repeat(8);
        writer
            .add(handle, tag, &node_payload(handle, deps, data.as_bytes()), compression)
            .unwrap();
    }
    writer.finish().unwrap()
}

// =============================================================================
// Assertions
// =============================================================================

/// Every edge (parent -> dep) has dep finalized before parent
pub fn assert_topological(order: &[u64], edges: &[BlobDef<'_>]) {
    let position = |h: u64| order.iter().position(|x| *x == h);
    for &(parent, _, deps) in edges {
        let Some(parent_at) = position(parent) else {
            continue;
        };
        for &dep in deps {
            let dep_at = position(dep).unwrap_or_else(|| {
                panic!("{} finalized without its dependency {} in {:?}", parent, dep, order)
            });
            assert!(
                dep_at < parent_at,
                "{} finalized before its dependency {} in {:?}",
                parent,
                dep,
                order
            );
        }
    }
}

/// After a failed load nothing is left alive and every instantiation was released
pub fn assert_no_leaks(recorder: &Recorder) {
    let instantiated: HashSet<u64> = recorder.instantiated().into_iter().collect();
    let released: HashSet<u64> = recorder.released().into_iter().collect();
    assert_eq!(instantiated, released, "events: {:?}", recorder.events());
    assert_eq!(recorder.instantiated().len(), recorder.released().len());
    assert_eq!(recorder.live(), 0);
}

// =============================================================================
// Byte Patching
// =============================================================================

/// Byte position of header field `field_offset` for the blob at `index`
pub fn header_field(bytes: &[u8], index: usize, field_offset: usize) -> usize {
    let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    16 + count * 4 + index * baw::format::HEADER_SIZE + field_offset
}

// Field offsets within a v2 header
pub const FIELD_COMPRESSION: usize = 12;
pub const FIELD_DECOMPRESSED_SIZE: usize = 13;
pub const FIELD_COMPRESSED_SIZE: usize = 17;
pub const FIELD_TOKEN: usize = 21;

pub fn patch_u32(bytes: &mut [u8], pos: usize, f: impl Fn(u32) -> u32) {
    let value = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
    bytes[pos..pos + 4].copy_from_slice(&f(value).to_le_bytes());
}
