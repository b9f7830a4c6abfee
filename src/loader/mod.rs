//! Dependency-Resolving Loader
//!
//! Loads one root blob together with everything it transitively depends on.
//!
//! ## Algorithm
//! Two explicit work stacks, no recursion:
//!
//! ```text
//!   to_load:      Visit(root)
//!                   │  read ─► decrypt ─► decompress ─► verify
//!                   │  dependencies() ─► instantiate_empty()
//!                   │
//!                   ├─ no deps ─► finalize() now, drop bytes
//!                   └─ deps    ─► push Seal(node), then Visit(dep) for each
//!
//!   Seal(node)    ─► to_finalize (every dependency is finished by now)
//!
//!   to_finalize:  drained in seal order ─► finalize() ─► drop bytes
//! ```
//!
//! Seal order is a depth-first post-order of the dependency graph, so each
//! node is finalized strictly after all of its dependencies, including
//! dependencies first reached through a sibling. A dependency that is still
//! open (entered, not yet sealed) when it is referenced again closes a cycle.
//!
//! ## Failure
//! Any error stops the load. Every object created so far (skeletons,
//! finalized objects, exclusive dependencies in flight) is handed to its
//! type's `release` before the error is returned.

mod hooks;
mod node;

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::CacheKey;
use crate::config::LoaderConfig;
use crate::container::Container;
use crate::error::{BawError, Result, Stage};
use crate::registry::{
    LoadParams, LoadedObject, Ownership, Registry, ReleasedObject, ResolvedDeps, Skeleton,
};

pub use hooks::{LoadHooks, NoHooks, StandardHooks};
pub use node::BlobNode;

// =============================================================================
// Requests and Results
// =============================================================================

/// Which blob of a container to load as the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSelector {
    Handle(u64),
    /// First blob in file order
    First,
    /// First blob in file order with this type tag
    FirstOfType(u32),
}

impl From<u64> for RootSelector {
    fn from(handle: u64) -> Self {
        RootSelector::Handle(handle)
    }
}

impl RootSelector {
    fn resolve(&self, container: &Container) -> Result<u64> {
        match *self {
            RootSelector::Handle(handle) if container.contains(handle) => Ok(handle),
            RootSelector::Handle(handle) => Err(BawError::UnknownHandle(handle)),
            RootSelector::First => container
                .headers()
                .first()
                .map(|h| h.handle)
                .ok_or_else(|| BawError::Config("container holds no blobs".to_string())),
            RootSelector::FirstOfType(tag) => container
                .headers()
                .iter()
                .find(|h| h.blob_type == tag)
                .map(|h| h.handle)
                .ok_or_else(|| BawError::Config(format!("no blob of type {} in container", tag))),
        }
    }
}

/// One load: root, identity of the source for cache keys, type parameters
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub root: RootSelector,
    pub source_id: Arc<str>,
    pub params: LoadParams,
}

impl LoadRequest {
    pub fn new(root: impl Into<RootSelector>) -> Self {
        Self {
            root: root.into(),
            source_id: Arc::from(""),
            params: LoadParams::default(),
        }
    }

    /// Identity of the container, used to derive cache keys
    pub fn with_source_id(mut self, source_id: impl Into<Arc<str>>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn with_params(mut self, params: LoadParams) -> Self {
        self.params = params;
        self
    }
}

/// Counters collected during one load
#[derive(Debug, Default, Clone)]
pub struct LoadStats {
    /// Distinct blobs reached, including cache hits
    pub visited: usize,
    pub instantiated: usize,
    pub finalized: usize,
    pub cache_hits: usize,
    /// Deepest dependency level reached (root = 0)
    pub max_depth: u32,
    pub bytes_decompressed: u64,
    /// Handles in the order they were finalized
    pub finalize_order: Vec<u64>,
}

// =============================================================================
// Loader
// =============================================================================

/// Loads object graphs out of containers using a blob type registry
///
/// Holds no mutable state, so one loader can serve loads on many threads.
pub struct Loader<'r> {
    registry: &'r Registry,
    config: LoaderConfig,
}

impl<'r> Loader<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, LoaderConfig::default())
    }

    pub fn with_config(registry: &'r Registry, config: LoaderConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Open a container from `source` and load the requested root
    pub fn load<S>(
        &self,
        source: S,
        request: &LoadRequest,
        hooks: &dyn LoadHooks,
    ) -> Result<LoadedObject>
    where
        S: Read + Seek + Send + 'static,
    {
        let mut container = Container::open_with_limit(source, self.config.max_blob_size)?;
        self.load_container(&mut container, request, hooks)
    }

    /// Load the requested root from an already open container
    pub fn load_container(
        &self,
        container: &mut Container,
        request: &LoadRequest,
        hooks: &dyn LoadHooks,
    ) -> Result<LoadedObject> {
        self.load_container_with_stats(container, request, hooks)
            .map(|(object, _)| object)
    }

    /// Like [`Loader::load_container`], also returning load counters
    pub fn load_container_with_stats(
        &self,
        container: &mut Container,
        request: &LoadRequest,
        hooks: &dyn LoadHooks,
    ) -> Result<(LoadedObject, LoadStats)> {
        let root = request.root.resolve(container)?;
        let started = Instant::now();
        tracing::info!(root, source = %request.source_id, blobs = container.len(), "load started");

        let session = LoadSession::new(self.registry, &self.config, hooks, request, root);
        match session.run(container) {
            Ok((object, stats)) => {
                tracing::info!(
                    root,
                    visited = stats.visited,
                    instantiated = stats.instantiated,
                    cache_hits = stats.cache_hits,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "load finished"
                );
                Ok((object, stats))
            }
            Err(e) => {
                tracing::warn!(root, error = %e, "load failed");
                Err(e)
            }
        }
    }

    /// Load several roots concurrently, one scoped thread per request
    ///
    /// `open` is called once per request so every thread reads through its
    /// own source. Results come back in request order.
    pub fn load_parallel<F, S>(
        &self,
        open: F,
        requests: &[LoadRequest],
        hooks: &dyn LoadHooks,
    ) -> Vec<Result<LoadedObject>>
    where
        F: Fn() -> Result<S> + Sync,
        S: Read + Seek + Send + 'static,
    {
        let open = &open;
        let outcome = crossbeam::thread::scope(|scope| {
            let workers: Vec<_> = requests
                .iter()
                .map(|request| {
                    scope.spawn(move |_| {
                        let source = open()?;
                        self.load(source, request, hooks)
                    })
                })
                .collect();

            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(BawError::Worker("load thread panicked".into())))
                })
                .collect::<Vec<_>>()
        });

        outcome.unwrap_or_else(|_| {
            requests
                .iter()
                .map(|_| Err(BawError::Worker("load scope panicked".into())))
                .collect()
        })
    }
}

// =============================================================================
// Load Session
// =============================================================================

/// Work item on the `to_load` stack
enum Frame {
    Visit { handle: u64, depth: u32 },
    /// All dependencies of this node have been processed
    Seal(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    /// Entered, dependencies still being processed
    Open,
    /// Waiting in `to_finalize`
    Sealed,
    /// Finalized or taken from the cache
    Done,
}

/// Instantiated node awaiting finalize
struct PendingNode {
    node: BlobNode,
    skeleton: Skeleton,
    deps: Vec<u64>,
}

/// Finalized object and whether this load still owns it
struct Resolved {
    object: LoadedObject,
    /// False once published to (or taken from) the cache
    owned: bool,
}

/// State of one top-level load
///
/// Dropping a session releases every object it still owns, which is how
/// all error paths clean up.
struct LoadSession<'a> {
    registry: &'a Registry,
    config: &'a LoaderConfig,
    hooks: &'a dyn LoadHooks,
    request: &'a LoadRequest,
    root: u64,
    state: HashMap<u64, VisitState>,
    to_load: Vec<Frame>,
    /// Nodes between instantiate and seal
    pending: HashMap<u64, PendingNode>,
    to_finalize: VecDeque<(u64, PendingNode)>,
    resolved: HashMap<u64, Resolved>,
    /// Exclusive objects already moved into a parent
    consumed: HashSet<u64>,
    stats: LoadStats,
}

impl<'a> LoadSession<'a> {
    fn new(
        registry: &'a Registry,
        config: &'a LoaderConfig,
        hooks: &'a dyn LoadHooks,
        request: &'a LoadRequest,
        root: u64,
    ) -> Self {
        Self {
            registry,
            config,
            hooks,
            request,
            root,
            state: HashMap::new(),
            to_load: Vec::new(),
            pending: HashMap::new(),
            to_finalize: VecDeque::new(),
            resolved: HashMap::new(),
            consumed: HashSet::new(),
            stats: LoadStats::default(),
        }
    }

    fn run(mut self, container: &mut Container) -> Result<(LoadedObject, LoadStats)> {
        // Phase 1: discover, decompress, instantiate
        self.to_load.push(Frame::Visit {
            handle: self.root,
            depth: 0,
        });
        while let Some(frame) = self.to_load.pop() {
            match frame {
                Frame::Visit { handle, depth } => self.visit(container, handle, depth)?,
                Frame::Seal(handle) => self.seal(handle),
            }
        }

        // Phase 2: finalize interior nodes, dependencies first
        while let Some((handle, pending)) = self.to_finalize.pop_front() {
            self.finalize_pending(handle, pending)?;
        }

        let root = self
            .resolved
            .remove(&self.root)
            .map(|r| r.object)
            .ok_or(BawError::UnknownHandle(self.root))?;

        // Success: whatever is left is referenced from the root or the cache
        self.resolved.clear();
        Ok((root, std::mem::take(&mut self.stats)))
    }

    fn visit(&mut self, container: &mut Container, handle: u64, depth: u32) -> Result<()> {
        if self.state.contains_key(&handle) {
            return Ok(());
        }
        if depth > self.config.max_depth {
            return Err(BawError::DepthLimit {
                handle,
                depth,
                limit: self.config.max_depth,
            });
        }
        self.stats.visited += 1;
        self.stats.max_depth = self.stats.max_depth.max(depth);

        if handle != self.root {
            if let Some(object) = self.cache_lookup(handle) {
                tracing::debug!(handle, depth, "cache hit");
                self.stats.cache_hits += 1;
                self.state.insert(handle, VisitState::Done);
                self.resolved.insert(
                    handle,
                    Resolved {
                        object,
                        owned: false,
                    },
                );
                return Ok(());
            }
        }

        let registry = self.registry;
        let request = self.request;
        let params = &request.params;

        let header = *container
            .header(handle)
            .ok_or(BawError::UnknownHandle(handle))?;
        let blob_type = registry
            .get(header.blob_type)
            .ok_or(BawError::UnknownBlobType {
                handle,
                blob_type: header.blob_type,
            })?;

        let stored = container.raw_bytes(handle)?;
        let node = BlobNode::materialize(header, stored, depth, self.hooks, self.config)?;
        self.stats.bytes_decompressed += node.bytes().len() as u64;

        let deps = unique(
            blob_type
                .dependencies(node.bytes())
                .map_err(|e| e.at(handle, Stage::Dependencies))?,
        );
        for &dep in &deps {
            if dep == handle || self.state.get(&dep) == Some(&VisitState::Open) {
                return Err(BawError::CyclicDependency { handle: dep, via: handle });
            }
        }

        let mut skeleton = blob_type
            .instantiate_empty(node.bytes(), params)
            .map_err(|e| e.at(handle, Stage::Instantiate))?;
        self.stats.instantiated += 1;
        tracing::debug!(
            handle,
            depth,
            blob_type = blob_type.name(),
            deps = deps.len(),
            validated = node.validated,
            "blob instantiated"
        );

        if deps.is_empty() {
            // Leaf: finalize right away, no second pass
            let mut none = ResolvedDeps::new();
            if let Err(e) = blob_type.finalize(&mut skeleton, node.bytes(), &mut none, params) {
                registry.release(handle, header.blob_type, ReleasedObject::Skeleton(skeleton));
                return Err(e.at(handle, Stage::Finalize));
            }
            drop(node);
            self.complete(handle, header.blob_type, skeleton);
            return Ok(());
        }

        self.state.insert(handle, VisitState::Open);
        self.to_load.push(Frame::Seal(handle));
        // Reverse so dependencies are visited in declaration order
        for &dep in deps.iter().rev() {
            if !self.state.contains_key(&dep) {
                self.to_load.push(Frame::Visit {
                    handle: dep,
                    depth: depth + 1,
                });
            }
        }
        self.pending.insert(
            handle,
            PendingNode {
                node,
                skeleton,
                deps,
            },
        );
        Ok(())
    }

    fn seal(&mut self, handle: u64) {
        self.state.insert(handle, VisitState::Sealed);
        if let Some(pending) = self.pending.remove(&handle) {
            self.to_finalize.push_back((handle, pending));
        }
    }

    fn finalize_pending(&mut self, handle: u64, pending: PendingNode) -> Result<()> {
        let PendingNode {
            node,
            mut skeleton,
            deps,
        } = pending;
        let registry = self.registry;
        let request = self.request;
        let params = &request.params;
        let tag = node.header.blob_type;

        let Some(blob_type) = registry.get(tag) else {
            drop(skeleton);
            return Err(BawError::UnknownBlobType {
                handle,
                blob_type: tag,
            });
        };

        let mut resolved = ResolvedDeps::new();
        let mut moved = Vec::new();
        let mut outcome = Ok(());
        for &dep in &deps {
            match self.take_dependency(dep, handle) {
                Ok((object, was_moved)) => {
                    if was_moved {
                        moved.push(dep);
                    }
                    resolved.insert(dep, object);
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if outcome.is_ok() {
            outcome = blob_type
                .finalize(&mut skeleton, node.bytes(), &mut resolved, params)
                .map_err(|e| e.at(handle, Stage::Finalize));
        }

        if let Err(e) = outcome {
            registry.release(handle, tag, ReleasedObject::Skeleton(skeleton));
            for (dep, object) in resolved.into_remaining() {
                if moved.contains(&dep) {
                    registry.release(dep, object.blob_type(), ReleasedObject::Finalized(object));
                }
            }
            return Err(e);
        }

        // Exclusive dependencies finalize did not take have no other owner
        for (dep, object) in resolved.into_remaining() {
            if moved.contains(&dep) {
                tracing::warn!(handle, dep, "exclusive dependency left unused by finalize");
                registry.release(dep, object.blob_type(), ReleasedObject::Finalized(object));
            }
        }

        drop(node);
        self.complete(handle, tag, skeleton);
        Ok(())
    }

    /// Hand a finished dependency to a parent: cloned if shared, moved if exclusive
    fn take_dependency(&mut self, dep: u64, parent: u64) -> Result<(LoadedObject, bool)> {
        if self.consumed.contains(&dep) {
            return Err(BawError::MalformedBlob {
                handle: parent,
                stage: Stage::Finalize,
                reason: format!("exclusive dependency {} already belongs to another blob", dep),
            });
        }

        let exclusive = match self.resolved.get(&dep) {
            Some(r) => r.owned && self.ownership_of(r.object.blob_type()) == Ownership::Exclusive,
            // Every dependency is finalized before its parent unless they form a cycle
            None => return Err(BawError::CyclicDependency { handle: dep, via: parent }),
        };

        if exclusive {
            if let Some(r) = self.resolved.remove(&dep) {
                self.consumed.insert(dep);
                return Ok((r.object, true));
            }
        }
        match self.resolved.get(&dep) {
            Some(r) => Ok((r.object.clone(), false)),
            None => Err(BawError::CyclicDependency { handle: dep, via: parent }),
        }
    }

    /// Record a finalized object, publishing shared sub-objects to the cache
    fn complete(&mut self, handle: u64, tag: u32, skeleton: Skeleton) {
        let object = LoadedObject::new(handle, tag, skeleton);
        self.state.insert(handle, VisitState::Done);
        self.stats.finalized += 1;
        self.stats.finalize_order.push(handle);

        let publish = handle != self.root && self.ownership_of(tag) == Ownership::Shared;
        if let (true, Some(cache)) = (publish, self.hooks.cache()) {
            let key = CacheKey::new(self.request.source_id.clone(), handle);
            let canonical = cache.insert(key.clone(), object.clone());
            if !canonical.ptr_eq(&object) {
                // Another load published this handle first; use its object
                self.registry
                    .release(handle, tag, ReleasedObject::Finalized(object));
            }
            self.hooks.sub_asset_cached(&key);
            self.resolved.insert(
                handle,
                Resolved {
                    object: canonical,
                    owned: false,
                },
            );
            return;
        }

        self.resolved.insert(
            handle,
            Resolved {
                object,
                owned: true,
            },
        );
    }

    fn cache_lookup(&self, handle: u64) -> Option<LoadedObject> {
        let cache = self.hooks.cache()?;
        cache.lookup(&CacheKey::new(self.request.source_id.clone(), handle))
    }

    fn ownership_of(&self, tag: u32) -> Ownership {
        self.registry
            .get(tag)
            .map(|t| t.ownership())
            .unwrap_or(Ownership::Shared)
    }
}

impl Drop for LoadSession<'_> {
    fn drop(&mut self) {
        let registry = self.registry;
        let mut released = 0usize;

        for (handle, pending) in self.pending.drain() {
            let tag = pending.node.header.blob_type;
            registry.release(handle, tag, ReleasedObject::Skeleton(pending.skeleton));
            released += 1;
        }
        for (handle, pending) in self.to_finalize.drain(..) {
            let tag = pending.node.header.blob_type;
            registry.release(handle, tag, ReleasedObject::Skeleton(pending.skeleton));
            released += 1;
        }
        for (handle, resolved) in self.resolved.drain() {
            if resolved.owned {
                let tag = resolved.object.blob_type();
                registry.release(handle, tag, ReleasedObject::Finalized(resolved.object));
                released += 1;
            }
        }

        if released > 0 {
            tracing::warn!(root = self.root, released, "load aborted, partial objects released");
        }
    }
}

/// Drop repeated handles, keeping first occurrences in order
fn unique(handles: Vec<u64>) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(handles.len());
    handles.into_iter().filter(|h| seen.insert(*h)).collect()
}
