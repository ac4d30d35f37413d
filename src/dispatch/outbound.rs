//! Outbound side: tree changes become registrations and signals.
//!
//! [`BridgeObserver`] is subscribed to the tree and runs on the owner
//! thread. It never blocks: publications and signals go to a [`BusSink`],
//! which for a live bridge is the connection manager's FIFO command queue.
//!
//! | Tree change | Registry | Signal |
//! |-------------|----------|--------|
//! | `RootChanged` | register subtree | none |
//! | `NodeAdded` | register subtree | `ChildrenChanged` `add` on parent |
//! | `NodeRemoved` | unregister subtree | `ChildrenChanged` `remove` on parent |
//! | `StateChanged` | none | `StateChanged` |
//! | `BoundsChanged` | none | `BoundsChanged` |
//! | `FocusChanged` | none | `Event.Focus` `Focus` |
//! | `TreeCleared` | unregister all | none |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::trace;

use crate::event::{BridgeEvent, EventHub};
use crate::feedback::{Cue, Feedback};
use crate::identifiers::{BusName, NodeId, ObjectPath};
use crate::protocol::interfaces::{self, signals};
use crate::protocol::{Args, ObjectRef, Signal};
use crate::registry::ObjectPathRegistry;
use crate::transport::ConnectionManager;
use crate::tree::{AccessibleTree, StateFlag, TreeChange, TreeObserver};

// ============================================================================
// BusSink
// ============================================================================

/// Where outbound publications and signals go.
///
/// Implementations must not block and must preserve call order.
pub trait BusSink: Send + Sync {
    /// Exposes a path.
    fn publish(&self, path: ObjectPath, interfaces: Vec<String>);

    /// Retires a path.
    fn withdraw(&self, path: ObjectPath);

    /// Broadcasts a signal.
    fn emit(&self, signal: Signal);
}

impl BusSink for ConnectionManager {
    fn publish(&self, path: ObjectPath, interfaces: Vec<String>) {
        ConnectionManager::publish(self, path, interfaces);
    }

    fn withdraw(&self, path: ObjectPath) {
        ConnectionManager::withdraw(self, path);
    }

    fn emit(&self, signal: Signal) {
        ConnectionManager::emit(self, signal);
    }
}

// ============================================================================
// BridgeObserver
// ============================================================================

/// Tree observer that keeps the registry and the bus in step with the tree.
pub struct BridgeObserver {
    registry: Arc<ObjectPathRegistry>,
    sink: Arc<dyn BusSink>,
    events: EventHub,
    feedback: Feedback,
    identity: BusName,
}

impl std::fmt::Debug for BridgeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeObserver")
            .field("identity", &self.identity)
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl BridgeObserver {
    pub(crate) fn new(
        registry: Arc<ObjectPathRegistry>,
        sink: Arc<dyn BusSink>,
        events: EventHub,
        feedback: Feedback,
        identity: BusName,
    ) -> Self {
        Self {
            registry,
            sink,
            events,
            feedback,
            identity,
        }
    }

    /// Registers and publishes every reachable node of the tree.
    ///
    /// Used when a bridge attaches to a tree that already has content.
    pub(crate) fn expose_existing(&self, tree: &AccessibleTree) {
        if let Some(root) = tree.root() {
            self.expose(tree, root);
        }
    }

    /// Registers `id` and its subtree, publishing newly registered paths.
    fn expose(&self, tree: &AccessibleTree, id: NodeId) {
        let nodes = tree
            .subtree(id)
            .into_iter()
            .filter_map(|n| tree.node(n).map(|node| (n, node.capabilities().set())));
        for entry in self.registry.register_all(nodes) {
            self.sink
                .publish(entry.path().clone(), entry.capabilities().interfaces());
        }
    }

    /// Unregisters ids, withdrawing their paths.
    fn retire(&self, removed: &[NodeId]) {
        for entry in self.registry.unregister_all(removed.iter().copied()) {
            self.sink.withdraw(entry.path().clone());
        }
    }

    fn reference(&self, path: ObjectPath) -> ObjectRef {
        ObjectRef::new(self.identity.as_str(), path)
    }

    /// Emits a signal and its event, with optional feedback around them.
    fn send(&self, signal: Signal, event: BridgeEvent, cue: Option<Cue>) {
        self.feedback.around(cue, || {
            self.sink.emit(signal);
            self.events.emit(&event);
        });
    }

    fn registered_path(&self, node: NodeId) -> Option<ObjectPath> {
        let path = self.registry.path_of(node);
        if path.is_none() {
            trace!(%node, "Signal dropped, node not registered");
        }
        path
    }
}

fn wire_index(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

impl TreeObserver for BridgeObserver {
    fn on_change(&self, tree: &AccessibleTree, change: &TreeChange) {
        match change {
            TreeChange::RootChanged { root } => self.expose(tree, *root),

            TreeChange::NodeAdded {
                parent,
                node,
                index,
            } => {
                if !tree.is_reachable(*node) {
                    trace!(%node, "Attached to a detached subtree");
                    return;
                }
                self.expose(tree, *node);
                let (Some(target), Some(child)) =
                    (self.registered_path(*parent), self.registered_path(*node))
                else {
                    return;
                };
                let signal = Signal::new(
                    target.clone(),
                    interfaces::EVENT_OBJECT,
                    signals::CHILDREN_CHANGED,
                    signals::DETAIL_ADD,
                    Args::empty()
                        .with(wire_index(*index))
                        .with(self.reference(child.clone())),
                );
                let event = BridgeEvent::ChildAdded {
                    target,
                    index: *index,
                    child,
                };
                self.send(signal, event, None);
            }

            TreeChange::NodeRemoved {
                parent,
                node,
                index,
                removed,
            } => {
                let child = self.registry.path_of(*node);
                self.retire(removed);
                let (Some(parent), Some(index), Some(child)) = (parent, index, child) else {
                    return;
                };
                let Some(target) = self.registered_path(*parent) else {
                    return;
                };
                let signal = Signal::new(
                    target.clone(),
                    interfaces::EVENT_OBJECT,
                    signals::CHILDREN_CHANGED,
                    signals::DETAIL_REMOVE,
                    Args::empty()
                        .with(wire_index(*index))
                        .with(self.reference(child.clone())),
                );
                let event = BridgeEvent::ChildRemoved {
                    target,
                    index: *index,
                    child,
                };
                self.send(signal, event, None);
            }

            TreeChange::StateChanged { node, old, new } => {
                let Some(target) = self.registered_path(*node) else {
                    return;
                };
                let toggled = old.contains(StateFlag::Checked) != new.contains(StateFlag::Checked);
                let signal = Signal::new(
                    target.clone(),
                    interfaces::EVENT_OBJECT,
                    signals::STATE_CHANGED,
                    "",
                    Args::empty().with(*old).with(*new),
                );
                let event = BridgeEvent::StateChanged {
                    target,
                    old: *old,
                    new: *new,
                };
                self.send(signal, event, toggled.then_some(Cue::Toggle));
            }

            TreeChange::BoundsChanged { node, bounds } => {
                let Some(target) = self.registered_path(*node) else {
                    return;
                };
                let signal = Signal::new(
                    target.clone(),
                    interfaces::EVENT_OBJECT,
                    signals::BOUNDS_CHANGED,
                    "",
                    Args::empty().with(bounds.unwrap_or_default()),
                );
                let event = BridgeEvent::BoundsChanged {
                    target,
                    bounds: *bounds,
                };
                self.send(signal, event, None);
            }

            TreeChange::FocusChanged { node, previous } => {
                let Some(target) = self.registered_path(*node) else {
                    return;
                };
                let signal = Signal::new(
                    target.clone(),
                    interfaces::EVENT_FOCUS,
                    signals::FOCUS,
                    "",
                    Args::empty(),
                );
                let event = BridgeEvent::FocusChanged {
                    target,
                    previous: previous.and_then(|p| self.registry.path_of(p)),
                };
                self.send(signal, event, Some(Cue::Focus));
            }

            TreeChange::TreeCleared { removed } => self.retire(removed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
