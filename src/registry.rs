//! Object path registry.
//!
//! Bijection between live nodes and the object paths they are exposed
//! under. Written on the owner thread, read from the dispatch context.
//!
//! # Snapshot Reads
//!
//! ```text
//! owner thread                         dispatch context
//! ───────────                          ────────────────
//! writer lock                          read lock (brief)
//! clone current snapshot               clone Arc<RegistrySnapshot>
//! apply batch to clone                 release lock
//! swap in new Arc                      resolve against the clone
//! ```
//!
//! A reader holds an immutable snapshot and never observes a half-applied
//! batch.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{NodeId, ObjectPath};
use crate::tree::CapabilitySet;

// ============================================================================
// PathEntry
// ============================================================================

/// A registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    node: NodeId,
    path: ObjectPath,
    capabilities: CapabilitySet,
}

impl PathEntry {
    /// Returns the node id.
    #[inline]
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the object path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Returns the capabilities declared at registration.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }
}

// ============================================================================
// RegistrySnapshot
// ============================================================================

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    by_node: FxHashMap<NodeId, PathEntry>,
    by_path: FxHashMap<ObjectPath, NodeId>,
}

impl RegistrySnapshot {
    /// Resolves a path to its node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path is not registered.
    pub fn resolve(&self, path: &ObjectPath) -> Result<NodeId> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| Error::not_found(path))
    }

    /// Returns the entry registered at `path`.
    #[must_use]
    pub fn entry(&self, path: &ObjectPath) -> Option<&PathEntry> {
        self.by_path.get(path).and_then(|node| self.by_node.get(node))
    }

    /// Returns the entry of `node`.
    #[must_use]
    pub fn entry_of(&self, node: NodeId) -> Option<&PathEntry> {
        self.by_node.get(&node)
    }

    /// Returns the path of `node`.
    #[must_use]
    pub fn path_of(&self, node: NodeId) -> Option<&ObjectPath> {
        self.by_node.get(&node).map(|e| &e.path)
    }

    /// Returns `true` if `node` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    /// Returns the number of registered nodes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// Iterates all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &PathEntry> {
        self.by_node.values()
    }

    fn insert(&mut self, node: NodeId, capabilities: CapabilitySet) -> (PathEntry, bool) {
        if let Some(existing) = self.by_node.get_mut(&node) {
            existing.capabilities = capabilities;
            return (existing.clone(), false);
        }
        let entry = PathEntry {
            node,
            path: ObjectPath::for_node(node),
            capabilities,
        };
        self.by_path.insert(entry.path.clone(), node);
        self.by_node.insert(node, entry.clone());
        (entry, true)
    }

    fn remove(&mut self, node: NodeId) -> Option<PathEntry> {
        let entry = self.by_node.remove(&node)?;
        self.by_path.remove(&entry.path);
        Some(entry)
    }
}

// ============================================================================
// ObjectPathRegistry
// ============================================================================

/// Registry of exposed nodes.
///
/// Paths derive from [`NodeId`], so the same node always maps to the same
/// path and a recycled arena slot never inherits a retired path.
///
/// # Example
///
/// ```ignore
/// let registry = ObjectPathRegistry::new();
/// let path = registry.register(button, caps);
/// assert_eq!(registry.resolve(&path)?, button);
///
/// registry.unregister(button);
/// assert!(registry.resolve(&path).is_err());
/// ```
#[derive(Debug, Default)]
pub struct ObjectPathRegistry {
    /// Current snapshot.
    current: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes writers so no batch is lost.
    writer: Mutex<()>,
}

// ============================================================================
// ObjectPathRegistry - Reads
// ============================================================================

impl ObjectPathRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Resolves a path against the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path is not registered.
    pub fn resolve(&self, path: &ObjectPath) -> Result<NodeId> {
        self.snapshot().resolve(path)
    }

    /// Returns the entry at `path`.
    #[must_use]
    pub fn entry(&self, path: &ObjectPath) -> Option<PathEntry> {
        self.snapshot().entry(path).cloned()
    }

    /// Returns the path of `node`.
    #[must_use]
    pub fn path_of(&self, node: NodeId) -> Option<ObjectPath> {
        self.snapshot().path_of(node).cloned()
    }

    /// Returns `true` if `node` is registered.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.snapshot().contains(node)
    }

    /// Returns the number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

// ============================================================================
// ObjectPathRegistry - Writes
// ============================================================================

impl ObjectPathRegistry {
    /// Registers a node. Idempotent: a registered node keeps its path and
    /// only its capability set is refreshed.
    pub fn register(&self, node: NodeId, capabilities: CapabilitySet) -> ObjectPath {
        self.update(|snapshot| snapshot.insert(node, capabilities).0.path)
    }

    /// Registers a batch and returns the entries that were not registered
    /// before. The batch becomes visible atomically.
    pub fn register_all(
        &self,
        nodes: impl IntoIterator<Item = (NodeId, CapabilitySet)>,
    ) -> Vec<PathEntry> {
        let added = self.update(|snapshot| {
            nodes
                .into_iter()
                .filter_map(|(node, caps)| {
                    let (entry, is_new) = snapshot.insert(node, caps);
                    is_new.then_some(entry)
                })
                .collect::<Vec<_>>()
        });
        if !added.is_empty() {
            debug!(count = added.len(), "Registered nodes");
        }
        added
    }

    /// Unregisters a node. Returns its retired entry.
    pub fn unregister(&self, node: NodeId) -> Option<PathEntry> {
        self.update(|snapshot| snapshot.remove(node))
    }

    /// Unregisters a batch and returns the retired entries. The batch
    /// becomes visible atomically.
    pub fn unregister_all(&self, nodes: impl IntoIterator<Item = NodeId>) -> Vec<PathEntry> {
        let removed = self.update(|snapshot| {
            nodes
                .into_iter()
                .filter_map(|node| snapshot.remove(node))
                .collect::<Vec<_>>()
        });
        if !removed.is_empty() {
            debug!(count = removed.len(), "Unregistered nodes");
        }
        removed
    }

    fn update<T>(&self, mutate: impl FnOnce(&mut RegistrySnapshot) -> T) -> T {
        let _writer = self.writer.lock();
        let mut next = RegistrySnapshot::clone(&self.current.read());
        let out = mutate(&mut next);
        trace!(len = next.len(), "Publishing registry snapshot");
        *self.current.write() = Arc::new(next);
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use proptest::prelude::*;

    use crate::tree::Capability;

    fn caps() -> CapabilitySet {
        CapabilitySet::EMPTY.with(Capability::Action)
    }

    #[test]
    fn test_register_resolve() {
        let registry = ObjectPathRegistry::new();
        let node = NodeId::new(1, 0);
        let path = registry.register(node, caps());

        assert_eq!(registry.resolve(&path).expect("resolve"), node);
        assert_eq!(registry.path_of(node), Some(path.clone()));
        assert_eq!(
            registry.entry(&path).map(|e| e.capabilities()),
            Some(caps())
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ObjectPathRegistry::new();
        let node = NodeId::new(2, 0);
        let first = registry.register(node, CapabilitySet::EMPTY);
        let second = registry.register(node, caps());

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entry(&first).map(|e| e.capabilities()), Some(caps()));
        assert!(registry.register_all([(node, caps())]).is_empty());
    }

    #[test]
    fn test_resolve_after_unregister_is_not_found() {
        let registry = ObjectPathRegistry::new();
        let node = NodeId::new(3, 0);
        let path = registry.register(node, caps());

        let retired = registry.unregister(node).expect("entry");
        assert_eq!(retired.path(), &path);
        assert!(matches!(registry.resolve(&path), Err(Error::NotFound { .. })));
        assert!(registry.unregister(node).is_none());
    }

    #[test]
    fn test_recycled_slot_does_not_resolve_old_path() {
        let registry = ObjectPathRegistry::new();
        let old = NodeId::new(5, 0);
        let old_path = registry.register(old, caps());
        registry.unregister(old);

        let recycled = NodeId::new(5, 1);
        let new_path = registry.register(recycled, caps());
        assert_ne!(old_path, new_path);
        assert!(registry.resolve(&old_path).is_err());
    }

    #[test]
    fn test_snapshot_is_stable() {
        let registry = ObjectPathRegistry::new();
        let node = NodeId::new(7, 0);
        let path = registry.register(node, caps());
        let before = registry.snapshot();
        registry.unregister(node);

        assert_eq!(before.resolve(&path).expect("old snapshot"), node);
        assert!(registry.snapshot().resolve(&path).is_err());
    }

    #[test]
    fn test_batches_are_atomic_for_readers() {
        let registry = Arc::new(ObjectPathRegistry::new());
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut checks = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let snapshot = registry.snapshot();
                        for pair in 0..64u32 {
                            let c = NodeId::new(pair * 2, 0);
                            let d = NodeId::new(pair * 2 + 1, 0);
                            assert_eq!(snapshot.contains(c), snapshot.contains(d), "torn batch");
                            if let Some(path) = snapshot.path_of(c) {
                                assert_eq!(snapshot.resolve(path).expect("resolve"), c);
                            }
                            checks += 1;
                        }
                    }
                    checks
                })
            })
            .collect();

        for round in 0..50 {
            for pair in 0..64u32 {
                let c = NodeId::new(pair * 2, 0);
                let d = NodeId::new(pair * 2 + 1, 0);
                if round % 2 == 0 {
                    registry.register_all([(c, caps()), (d, caps())]);
                } else {
                    registry.unregister_all([c, d]);
                }
            }
        }
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().expect("reader") > 0);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u32, u32),
        Unregister(u32, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..16, 0u32..3).prop_map(|(i, g)| Op::Register(i, g)),
            (0u32..16, 0u32..3).prop_map(|(i, g)| Op::Unregister(i, g)),
        ]
    }

    proptest! {
        #[test]
        fn test_no_aliasing(ops in prop::collection::vec(op(), 0..64)) {
            let registry = ObjectPathRegistry::new();
            for op in ops {
                match op {
                    Op::Register(i, g) => {
                        registry.register(NodeId::new(i, g), CapabilitySet::EMPTY);
                    }
                    Op::Unregister(i, g) => {
                        registry.unregister(NodeId::new(i, g));
                    }
                }

                let snapshot = registry.snapshot();
                prop_assert_eq!(snapshot.by_node.len(), snapshot.by_path.len());
                for entry in snapshot.iter() {
                    prop_assert_eq!(snapshot.resolve(entry.path()).ok(), Some(entry.node()));
                }
            }
        }
    }
}
