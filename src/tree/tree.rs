//! Arena-backed accessible tree with change observation.
//!
//! The tree belongs to the application and is only touched from the owner
//! thread. Every structural or state mutation goes through a method here,
//! which then notifies subscribed [`TreeObserver`]s. The bridge is one such
//! observer; it never polls.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::NodeId;

use super::node::{AccessibleNode, NodeBuilder, Rect, StateFlag, StateSet};

// ============================================================================
// TreeChange
// ============================================================================

/// A mutation observed on the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    /// A new root was installed.
    RootChanged {
        /// New root.
        root: NodeId,
    },

    /// A node (and its subtree) was attached under `parent`.
    NodeAdded {
        /// Parent the node was attached to.
        parent: NodeId,
        /// Attached node.
        node: NodeId,
        /// Position among the parent's children.
        index: usize,
    },

    /// A node and its subtree were removed.
    NodeRemoved {
        /// Former parent, `None` if the node was the root or detached.
        parent: Option<NodeId>,
        /// Removed node.
        node: NodeId,
        /// Former position among the parent's children.
        index: Option<usize>,
        /// Every removed id, the node itself first.
        removed: Vec<NodeId>,
    },

    /// The state set of a node changed.
    StateChanged {
        /// Affected node.
        node: NodeId,
        /// Previous states.
        old: StateSet,
        /// Current states.
        new: StateSet,
    },

    /// The bounds of a node changed.
    BoundsChanged {
        /// Affected node.
        node: NodeId,
        /// New bounds.
        bounds: Option<Rect>,
    },

    /// Keyboard focus moved.
    FocusChanged {
        /// Node now holding focus.
        node: NodeId,
        /// Node that held focus before.
        previous: Option<NodeId>,
    },

    /// Every node was removed.
    TreeCleared {
        /// Every removed id.
        removed: Vec<NodeId>,
    },
}

// ============================================================================
// TreeObserver
// ============================================================================

/// Receives tree mutations, on the owner thread, after they are applied.
pub trait TreeObserver: Send {
    /// Called once per mutation.
    fn on_change(&self, tree: &AccessibleTree, change: &TreeChange);
}

/// Handle returned by [`AccessibleTree::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

// ============================================================================
// AccessibleTree
// ============================================================================

struct Slot {
    generation: u32,
    node: Option<AccessibleNode>,
}

/// The application-owned tree of accessible nodes.
///
/// Nodes live in a slot arena. Removing a node frees its slot; the slot's
/// generation is bumped so the old [`NodeId`] never resolves again.
#[derive(Default)]
pub struct AccessibleTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    root: Option<NodeId>,
    focus: Option<NodeId>,
    observers: Vec<(ObserverId, Box<dyn TreeObserver>)>,
    next_observer: u64,
}

impl fmt::Debug for AccessibleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessibleTree")
            .field("len", &self.len)
            .field("root", &self.root)
            .field("focus", &self.focus)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AccessibleTree - Observation
// ============================================================================

impl AccessibleTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes an observer to every subsequent mutation.
    pub fn subscribe(&mut self, observer: Box<dyn TreeObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    /// Removes an observer. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    fn notify(&self, change: TreeChange) {
        trace!(?change, "Tree change");
        for (_, observer) in &self.observers {
            observer.on_change(self, &change);
        }
    }
}

// ============================================================================
// AccessibleTree - Queries
// ============================================================================

impl AccessibleTree {
    /// Returns the node, if alive.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&AccessibleNode> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut AccessibleNode> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    /// Returns `true` if the node is alive.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Returns the root node id.
    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Returns the focused node id.
    #[inline]
    #[must_use]
    pub fn focus(&self) -> Option<NodeId> {
        self.focus
    }

    /// Returns the number of live nodes, attached or not.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no nodes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the position of `id` among its parent's children.
    #[must_use]
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.node(id)?.parent?;
        self.node(parent)?.children.iter().position(|c| *c == id)
    }

    /// Returns `true` if the root is an ancestor-or-self of `id`.
    #[must_use]
    pub fn is_reachable(&self, id: NodeId) -> bool {
        let Some(root) = self.root else {
            return false;
        };
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == root {
                return true;
            }
            current = self.node(node_id).and_then(|n| n.parent);
        }
        false
    }

    /// Returns `id` and all its descendants in pre-order.
    #[must_use]
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.node(next) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}

// ============================================================================
// AccessibleTree - Structure
// ============================================================================

impl AccessibleTree {
    /// Creates a detached node.
    ///
    /// Detached nodes are invisible to observers until attached.
    pub fn create(&mut self, builder: NodeBuilder) -> NodeId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &self.slots[index as usize];
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                NodeId::new(index, 0)
            }
        };

        let node = AccessibleNode {
            id,
            role: builder.role,
            name: builder.name,
            description: builder.description,
            states: builder.states,
            bounds: builder.bounds,
            attributes: builder.attributes,
            relations: builder.relations,
            parent: None,
            children: Vec::new(),
            capabilities: builder.capabilities,
        };
        self.slots[id.index() as usize].node = Some(node);
        self.len += 1;
        id
    }

    /// Installs a new root, tearing down any existing tree first.
    pub fn set_root(&mut self, builder: NodeBuilder) -> NodeId {
        if self.root.is_some() {
            self.clear();
        }
        let id = self.create(builder);
        self.root = Some(id);
        self.notify(TreeChange::RootChanged { root: id });
        id
    }

    /// Creates a node and attaches it under `parent`.
    ///
    /// `index` of `None` appends.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if `parent` is not alive
    /// - [`Error::InvalidArgument`] if `index` is past the end
    pub fn insert(
        &mut self,
        parent: NodeId,
        index: Option<usize>,
        builder: NodeBuilder,
    ) -> Result<NodeId> {
        let child_count = self
            .node(parent)
            .ok_or_else(|| Error::not_found(parent))?
            .children
            .len();
        if index.is_some_and(|i| i > child_count) {
            return Err(Error::invalid_argument(format!(
                "child index {index:?} out of range 0..={child_count}"
            )));
        }
        let id = self.create(builder);
        self.attach(parent, id, index)?;
        Ok(id)
    }

    /// Attaches a detached node (with its subtree) under `parent`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if either node is not alive
    /// - [`Error::InvalidArgument`] if `child` is attached, is the root,
    ///   is an ancestor of `parent`, or `index` is past the end
    pub fn attach(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) -> Result<()> {
        let child_node = self.node(child).ok_or_else(|| Error::not_found(child))?;
        if child_node.parent.is_some() || self.root == Some(child) {
            return Err(Error::invalid_argument(format!("node {child} is already attached")));
        }
        if self.subtree(child).contains(&parent) {
            return Err(Error::invalid_argument(format!(
                "attaching {child} under {parent} would create a cycle"
            )));
        }

        let parent_node = self.node_mut(parent).ok_or_else(|| Error::not_found(parent))?;
        let index = index.unwrap_or(parent_node.children.len());
        if index > parent_node.children.len() {
            return Err(Error::invalid_argument(format!(
                "child index {index} out of range 0..={}",
                parent_node.children.len()
            )));
        }
        parent_node.children.insert(index, child);

        if let Some(child_node) = self.node_mut(child) {
            child_node.parent = Some(parent);
        }

        self.notify(TreeChange::NodeAdded {
            parent,
            node: child,
            index,
        });
        Ok(())
    }

    /// Removes a node and its whole subtree.
    ///
    /// Capability handlers are dropped with their nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let parent = self.node(id).ok_or_else(|| Error::not_found(id))?.parent;
        let index = self.index_in_parent(id);

        if let Some(parent_id) = parent
            && let Some(parent_node) = self.node_mut(parent_id)
        {
            parent_node.children.retain(|c| *c != id);
        }

        let removed = self.subtree(id);
        for node_id in &removed {
            self.free_slot(*node_id);
        }
        if self.root == Some(id) {
            self.root = None;
        }

        self.notify(TreeChange::NodeRemoved {
            parent,
            node: id,
            index,
            removed: removed.clone(),
        });
        Ok(removed)
    }

    /// Removes every node, attached or detached.
    pub fn clear(&mut self) {
        let removed: Vec<NodeId> = self
            .slots
            .iter()
            .filter_map(|slot| slot.node.as_ref().map(|n| n.id))
            .collect();
        for node_id in &removed {
            self.free_slot(*node_id);
        }
        self.root = None;
        self.notify(TreeChange::TreeCleared { removed });
    }

    fn free_slot(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index() as usize)
            && slot.generation == id.generation()
            && slot.node.take().is_some()
        {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index());
            self.len -= 1;
            if self.focus == Some(id) {
                self.focus = None;
            }
        }
    }
}

// ============================================================================
// AccessibleTree - State
// ============================================================================

impl AccessibleTree {
    /// Sets or clears one state flag.
    ///
    /// Returns `true` if the state set changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn set_state(&mut self, id: NodeId, flag: StateFlag, on: bool) -> Result<bool> {
        let mut states = self.node(id).ok_or_else(|| Error::not_found(id))?.states;
        states.set(flag, on);
        self.set_states(id, states)
    }

    /// Replaces the state set.
    ///
    /// Returns `true` if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn set_states(&mut self, id: NodeId, states: StateSet) -> Result<bool> {
        let node = self.node_mut(id).ok_or_else(|| Error::not_found(id))?;
        let old = node.states;
        if old == states {
            return Ok(false);
        }
        node.states = states;
        self.notify(TreeChange::StateChanged {
            node: id,
            old,
            new: states,
        });
        Ok(true)
    }

    /// Sets the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn set_bounds(&mut self, id: NodeId, bounds: Option<Rect>) -> Result<()> {
        let node = self.node_mut(id).ok_or_else(|| Error::not_found(id))?;
        if node.bounds == bounds {
            return Ok(());
        }
        node.bounds = bounds;
        self.notify(TreeChange::BoundsChanged { node: id, bounds });
        Ok(())
    }

    /// Moves keyboard focus to `id`.
    ///
    /// Clears `Focused` on the previous holder, sets it on `id`, then
    /// reports the focus change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn set_focus(&mut self, id: NodeId) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::not_found(id));
        }
        let previous = self.focus;
        if previous == Some(id) {
            return Ok(());
        }
        if let Some(prev) = previous
            && self.contains(prev)
        {
            self.set_state(prev, StateFlag::Focused, false)?;
        }
        self.focus = Some(id);
        self.set_state(id, StateFlag::Focused, true)?;
        self.notify(TreeChange::FocusChanged { node: id, previous });
        Ok(())
    }

    /// Sets the accessible name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        let node = self.node_mut(id).ok_or_else(|| Error::not_found(id))?;
        node.name = name.into();
        Ok(())
    }

    /// Sets or removes (`None`) an attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the node is not alive.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: Option<String>,
    ) -> Result<()> {
        let node = self.node_mut(id).ok_or_else(|| Error::not_found(id))?;
        let key = key.into();
        match value {
            Some(value) => {
                node.attributes.insert(key, value);
            }
            None => {
                node.attributes.remove(&key);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::tree::Role;

    struct Recorder(Arc<Mutex<Vec<TreeChange>>>);

    impl TreeObserver for Recorder {
        fn on_change(&self, _tree: &AccessibleTree, change: &TreeChange) {
            self.0.lock().push(change.clone());
        }
    }

    fn recorded_tree() -> (AccessibleTree, Arc<Mutex<Vec<TreeChange>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tree = AccessibleTree::new();
        tree.subscribe(Box::new(Recorder(Arc::clone(&log))));
        (tree, log)
    }

    #[test]
    fn test_insert_and_query() {
        let mut tree = AccessibleTree::new();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        let a = tree.insert(root, None, NodeBuilder::new(Role::Button)).expect("insert a");
        let b = tree.insert(root, Some(0), NodeBuilder::new(Role::Label)).expect("insert b");

        assert_eq!(tree.node(root).map(|n| n.children().to_vec()), Some(vec![b, a]));
        assert_eq!(tree.index_in_parent(a), Some(1));
        assert_eq!(tree.node(a).and_then(|n| n.parent()), Some(root));
        assert!(tree.is_reachable(a));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut tree = AccessibleTree::new();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        let result = tree.insert(root, Some(2), NodeBuilder::new(Role::Button));
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_detached_node_not_reachable() {
        let mut tree = AccessibleTree::new();
        tree.set_root(NodeBuilder::new(Role::Window));
        let loose = tree.create(NodeBuilder::new(Role::Label));
        assert!(tree.contains(loose));
        assert!(!tree.is_reachable(loose));
    }

    #[test]
    fn test_attach_rejects_cycle() {
        let mut tree = AccessibleTree::new();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        let group = tree.create(NodeBuilder::new(Role::Group));
        let inner = tree.create(NodeBuilder::new(Role::Label));
        tree.attach(group, inner, None).expect("attach inner");
        assert!(tree.attach(inner, group, None).is_err());
        assert!(tree.attach(root, inner, None).is_err());
        tree.attach(root, group, None).expect("attach group");
        assert!(tree.is_reachable(inner));
    }

    #[test]
    fn test_remove_frees_subtree_and_bumps_generation() {
        let mut tree = AccessibleTree::new();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        let list = tree.insert(root, None, NodeBuilder::new(Role::List)).expect("list");
        let item = tree.insert(list, None, NodeBuilder::new(Role::ListItem)).expect("item");

        let removed = tree.remove(list).expect("remove");
        assert_eq!(removed, vec![list, item]);
        assert!(!tree.contains(list));
        assert!(!tree.contains(item));

        let reused = tree.create(NodeBuilder::new(Role::Label));
        assert!(reused == NodeId::new(item.index(), item.generation() + 1)
            || reused == NodeId::new(list.index(), list.generation() + 1));
        assert!(tree.node(item).is_none());
    }

    #[test]
    fn test_events_are_reported_in_order() {
        let (mut tree, log) = recorded_tree();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        let button = tree.insert(root, None, NodeBuilder::new(Role::Button)).expect("button");
        tree.set_state(button, StateFlag::Enabled, true).expect("state");
        tree.set_bounds(button, Some(Rect::new(1, 2, 3, 4))).expect("bounds");
        tree.remove(button).expect("remove");

        let log = log.lock();
        assert!(matches!(log[0], TreeChange::RootChanged { .. }));
        assert!(matches!(log[1], TreeChange::NodeAdded { index: 0, .. }));
        assert!(matches!(log[2], TreeChange::StateChanged { .. }));
        assert!(matches!(log[3], TreeChange::BoundsChanged { .. }));
        assert!(matches!(log[4], TreeChange::NodeRemoved { index: Some(0), .. }));
    }

    #[test]
    fn test_unchanged_state_is_silent() {
        let (mut tree, log) = recorded_tree();
        let root = tree.set_root(NodeBuilder::new(Role::Window).state(StateFlag::Enabled));
        assert!(!tree.set_state(root, StateFlag::Enabled, true).expect("state"));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_focus_moves_state() {
        let (mut tree, log) = recorded_tree();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        let a = tree.insert(root, None, NodeBuilder::new(Role::Button)).expect("a");
        let b = tree.insert(root, None, NodeBuilder::new(Role::Button)).expect("b");

        tree.set_focus(a).expect("focus a");
        tree.set_focus(b).expect("focus b");

        assert_eq!(tree.focus(), Some(b));
        assert!(!tree.node(a).expect("a").states().contains(StateFlag::Focused));
        assert!(tree.node(b).expect("b").states().contains(StateFlag::Focused));
        assert!(log.lock().iter().any(|c| matches!(
            c,
            TreeChange::FocusChanged { node, previous: Some(prev) } if *node == b && *prev == a
        )));
    }

    #[test]
    fn test_clear_reports_everything() {
        let (mut tree, log) = recorded_tree();
        let root = tree.set_root(NodeBuilder::new(Role::Window));
        tree.insert(root, None, NodeBuilder::new(Role::Button)).expect("insert");
        tree.clear();

        assert!(tree.is_empty());
        assert!(tree.root().is_none());
        let log = log.lock();
        assert!(matches!(log.last(), Some(TreeChange::TreeCleared { removed }) if removed.len() == 2));
    }

    #[test]
    fn test_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tree = AccessibleTree::new();
        let id = tree.subscribe(Box::new(Recorder(Arc::clone(&log))));
        assert!(tree.unsubscribe(id));
        tree.set_root(NodeBuilder::new(Role::Window));
        assert!(log.lock().is_empty());
    }
}
