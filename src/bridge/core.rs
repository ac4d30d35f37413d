//! Bridge coordinator.
//!
//! The [`Bridge`] ties an [`AccessibleTree`] to the bus. It owns the
//! connection and the path registry and hands out the observer that keeps
//! both in step with the tree.
//!
//! # Example
//!
//! ```ignore
//! use a11y_bus_bridge::{AccessibleTree, Bridge, NodeBuilder, Role};
//!
//! let (bridge, owner) = Bridge::builder()
//!     .identity("org.example.App")
//!     .bus_url("ws://127.0.0.1:7000")
//!     .build()?;
//!
//! let mut tree = AccessibleTree::new();
//! tree.set_root(NodeBuilder::new(Role::Application).name("Example"));
//! bridge.attach(&mut tree)?;
//! bridge.start()?;
//!
//! // The tree moves to its owner thread
//! let owner = owner.spawn(tree)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::dispatch::{BridgeObserver, BusSink, OwnerQueue};
use crate::error::{Error, Result};
use crate::event::{BridgeEvent, EventHub};
use crate::feedback::Feedback;
use crate::identifiers::BusName;
use crate::registry::ObjectPathRegistry;
use crate::transport::{ConnectionManager, ConnectionState};
use crate::tree::{AccessibleTree, ObserverId};

use super::builder::BridgeBuilder;
use super::config::BridgeConfig;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the bridge.
pub(crate) struct BridgeInner {
    /// Well-known bus name.
    pub identity: BusName,

    /// Validated settings.
    pub config: BridgeConfig,

    /// Node to path mapping.
    pub registry: Arc<ObjectPathRegistry>,

    /// Bus connection.
    pub manager: Arc<ConnectionManager>,

    /// Bridge event handler slot.
    pub events: EventHub,

    /// Sound and vibration settings.
    pub feedback: Feedback,

    /// Queue into the owner thread.
    pub queue: OwnerQueue,

    /// Set while a tree is attached.
    pub attached: AtomicBool,
}

// ============================================================================
// Bridge
// ============================================================================

/// Accessibility bus bridge.
///
/// The bridge is responsible for:
/// - Claiming its identity on the bus and reconnecting after loss
/// - Publishing one object path per reachable tree node
/// - Routing inbound calls to the owner thread
/// - Emitting signals for tree changes
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct Bridge {
    pub(crate) inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .field("registered", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge - Constructor
// ============================================================================

impl Bridge {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    pub(crate) fn from_parts(
        identity: BusName,
        config: BridgeConfig,
        registry: Arc<ObjectPathRegistry>,
        manager: Arc<ConnectionManager>,
        events: EventHub,
        feedback: Feedback,
        queue: OwnerQueue,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                identity,
                config,
                registry,
                manager,
                events,
                feedback,
                queue,
                attached: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Bridge - Accessors
// ============================================================================

impl Bridge {
    /// Returns the well-known bus name.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &BusName {
        &self.inner.identity
    }

    /// Returns the settings the bridge was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns the path registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ObjectPathRegistry> {
        &self.inner.registry
    }

    /// Returns a queue into the owner thread.
    #[inline]
    #[must_use]
    pub fn owner_queue(&self) -> OwnerQueue {
        self.inner.queue.clone()
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Returns `true` while joined to the bus.
    #[inline]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state() == ConnectionState::Registered
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.subscribe_state()
    }

    /// Returns the bus-assigned unique name of the current session.
    #[must_use]
    pub fn unique_name(&self) -> Option<BusName> {
        self.inner.manager.unique_name()
    }

    /// Returns the number of calls waiting for a reply.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.manager.in_flight_count()
    }
}

// ============================================================================
// Bridge - Tree
// ============================================================================

impl Bridge {
    /// Starts observing `tree`.
    ///
    /// Every reachable node is registered and published right away; later
    /// changes follow through the observer. Must run on the thread that
    /// owns the tree.
    ///
    /// A bridge serves one tree at a time: node ids of two trees overlap,
    /// so they cannot share a registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a tree is already attached.
    pub fn attach(&self, tree: &mut AccessibleTree) -> Result<ObserverId> {
        if self.inner.attached.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_argument(
                "bridge already serves a tree; detach it first",
            ));
        }
        let observer = self.observer();
        observer.expose_existing(tree);
        let id = tree.subscribe(Box::new(observer));
        info!(
            identity = %self.inner.identity,
            nodes = self.inner.registry.len(),
            "Attached to tree"
        );
        Ok(id)
    }

    /// Stops observing `tree` and withdraws every path.
    ///
    /// Returns `false` if `id` was not subscribed.
    pub fn detach(&self, tree: &mut AccessibleTree, id: ObserverId) -> bool {
        if !tree.unsubscribe(id) {
            return false;
        }
        let nodes: Vec<_> = self.inner.registry.snapshot().iter().map(|e| e.node()).collect();
        for entry in self.inner.registry.unregister_all(nodes) {
            self.inner.manager.withdraw(entry.path().clone());
        }
        self.inner.attached.store(false, Ordering::SeqCst);
        debug!(identity = %self.inner.identity, "Detached from tree");
        true
    }

    fn observer(&self) -> BridgeObserver {
        let sink: Arc<dyn BusSink> = self.inner.manager.clone();
        BridgeObserver::new(
            Arc::clone(&self.inner.registry),
            sink,
            self.inner.events.clone(),
            self.inner.feedback.clone(),
            self.inner.identity.clone(),
        )
    }
}

// ============================================================================
// Bridge - Events
// ============================================================================

impl Bridge {
    /// Installs the bridge event handler, replacing any previous one.
    ///
    /// Tree events arrive on the owner thread, connection events on a
    /// dispatch task. The handler must not block.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.inner.events.set(Box::new(handler));
    }

    /// Removes the bridge event handler.
    pub fn clear_event_handler(&self) {
        self.inner.events.clear();
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    /// Connects to the bus in the background.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// already started or shut down.
    pub fn start(&self) -> Result<()> {
        self.inner.manager.start()
    }

    /// Waits until the bridge is joined to the bus.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`](crate::Error::ConnectionTimeout) if not registered in time
    /// - [`Error::Disconnected`](crate::Error::Disconnected) if shut down first
    pub async fn wait_registered(&self, wait: Duration) -> Result<()> {
        self.inner.manager.wait_registered(wait).await
    }

    /// Disconnects for good. In-flight calls are cancelled.
    pub fn shutdown(&self) {
        self.inner.manager.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::dispatch::OwnerContext;
    use crate::event::EventKind;
    use crate::transport::MemoryBus;
    use crate::tree::{NodeBuilder, Role, StateFlag};

    const WAIT: Duration = Duration::from_secs(2);

    fn build(bus: &MemoryBus) -> (Bridge, OwnerContext) {
        Bridge::builder()
            .identity("org.example.App")
            .transport(bus.transport())
            .build()
            .expect("build")
    }

    fn sample_tree() -> AccessibleTree {
        let mut tree = AccessibleTree::new();
        let root = tree.set_root(NodeBuilder::new(Role::Window).name("Main"));
        tree.insert(root, None, NodeBuilder::new(Role::Button).name("OK"))
            .expect("insert");
        tree
    }

    #[test]
    fn test_attach_registers_existing_nodes() {
        let bus = MemoryBus::new();
        let (bridge, _owner) = build(&bus);
        let mut tree = sample_tree();
        bridge.attach(&mut tree).expect("attach");
        assert_eq!(bridge.registry().len(), 2);
    }

    #[test]
    fn test_detach_unregisters_everything() {
        let bus = MemoryBus::new();
        let (bridge, _owner) = build(&bus);
        let mut tree = sample_tree();
        let id = bridge.attach(&mut tree).expect("attach");
        assert!(bridge.detach(&mut tree, id));
        assert!(bridge.registry().is_empty());
        assert!(!bridge.detach(&mut tree, id));

        // No longer observed
        let root = tree.root().expect("root");
        tree.insert(root, None, NodeBuilder::new(Role::Label)).expect("insert");
        assert!(bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_start_publishes_attached_tree() {
        let bus = MemoryBus::new();
        let (bridge, _owner) = build(&bus);
        let mut tree = sample_tree();
        bridge.attach(&mut tree).expect("attach");
        bridge.start().expect("start");
        bridge.wait_registered(WAIT).await.expect("registered");

        assert!(bridge.is_registered());
        assert!(bridge.unique_name().is_some());
        let mut expected: Vec<_> = bridge.registry().snapshot().iter().map(|e| e.path().clone()).collect();
        expected.sort();
        tokio::time::timeout(WAIT, async {
            loop {
                let mut published = bus.published(bridge.identity());
                published.sort();
                if published == expected {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("published in time");
        bridge.shutdown();
    }

    #[test]
    fn test_event_handler_sees_tree_events() {
        let bus = MemoryBus::new();
        let (bridge, _owner) = build(&bus);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bridge.on_event(move |event| sink.lock().expect("lock").push(event.kind()));

        let mut tree = sample_tree();
        bridge.attach(&mut tree).expect("attach");
        let root = tree.root().expect("root");
        tree.set_state(root, StateFlag::Active, true).expect("state");
        assert_eq!(*seen.lock().expect("lock"), vec![EventKind::StateChanged]);

        bridge.clear_event_handler();
        tree.set_state(root, StateFlag::Active, false).expect("state");
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn test_second_tree_rejected_until_detach() {
        let bus = MemoryBus::new();
        let (bridge, _owner) = build(&bus);
        let mut first = sample_tree();
        let mut second = sample_tree();

        let id = bridge.attach(&mut first).expect("attach");
        let err = bridge.attach(&mut second).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }), "got {err:?}");
        assert_eq!(bridge.registry().len(), 2);

        // Not observed, so changes do not leak into the registry
        let root = second.root().expect("root");
        second.insert(root, None, NodeBuilder::new(Role::Label)).expect("insert");
        assert_eq!(bridge.registry().len(), 2);

        assert!(bridge.detach(&mut first, id));
        bridge.attach(&mut second).expect("attach after detach");
        assert_eq!(bridge.registry().len(), 3);
    }

    #[test]
    fn test_shutdown_before_start() {
        let bus = MemoryBus::new();
        let (bridge, _owner) = build(&bus);
        bridge.shutdown();
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        assert!(bridge.start().is_err());
    }
}
