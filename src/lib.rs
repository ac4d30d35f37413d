//! Accessibility bus bridge.
//!
//! Exposes an in-process tree of accessible UI objects to assistive
//! technology (screen readers, switch access) over a message bus.
//!
//! # Architecture
//!
//! The bridge sits between two threads of control:
//!
//! - **Owner thread**: holds the [`AccessibleTree`], runs every handler and
//!   every tree mutation
//! - **Dispatch context**: tokio tasks doing bus I/O, never touching the tree
//!
//! Key design principles:
//!
//! - One object path per registered node, never reused for another node
//! - Calls resolve against a registry snapshot, then re-resolve on the
//!   owner thread before running
//! - Tree changes become bus signals in the order they happened
//! - The connection reconnects on its own and republishes every path
//!
//! # Quick Start
//!
//! ```no_run
//! use a11y_bus_bridge::{AccessibleTree, ActionList, Bridge, NodeBuilder, Result, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (bridge, owner) = Bridge::builder()
//!         .identity("org.example.App")
//!         .bus_url("ws://127.0.0.1:7000")
//!         .build()?;
//!
//!     let mut tree = AccessibleTree::new();
//!     let root = tree.set_root(NodeBuilder::new(Role::Window).name("Main"));
//!     tree.insert(
//!         root,
//!         None,
//!         NodeBuilder::new(Role::Button)
//!             .name("OK")
//!             .action(ActionList::new().with("press", || true)),
//!     )?;
//!
//!     bridge.attach(&mut tree)?;
//!     bridge.start()?;
//!
//!     // Serve calls on a dedicated owner thread
//!     let owner = owner.spawn(tree)?;
//!     bridge.wait_registered(std::time::Duration::from_secs(5)).await?;
//!
//!     owner.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`Bridge`] facade, builder and config |
//! | [`tree`] | [`AccessibleTree`], nodes and capabilities |
//! | [`registry`] | Node to object path mapping |
//! | [`dispatch`] | Inbound calls and outbound signals |
//! | [`transport`] | Bus connection and transports |
//! | [`protocol`] | Wire values and frames |
//! | [`feedback`] | Sound and vibration capability |
//! | [`event`] | Bridge events for the application |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Node ids, object paths, bus names |

// ============================================================================
// Modules
// ============================================================================

/// Bridge facade and configuration.
///
/// Use [`Bridge::builder()`] to create a configured bridge.
pub mod bridge;

/// Interface dispatcher.
///
/// Routes bus calls to the owner thread and tree changes to the bus.
pub mod dispatch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Application-facing bridge events.
pub mod event;

/// Sound and vibration feedback.
pub mod feedback;

/// Type-safe identifiers.
///
/// Newtype wrappers for node ids, object paths and bus names.
pub mod identifiers;

/// Wire values, codec and bus frames.
pub mod protocol;

/// Object path registry.
pub mod registry;

/// Bus connection and transports.
pub mod transport;

/// Accessible tree.
///
/// - [`AccessibleTree`] - Node arena with observers
/// - [`NodeBuilder`] - Node construction
/// - [`Capabilities`] - Optional interface handlers
pub mod tree;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeBuilder, BridgeConfig};

// Dispatch types
pub use dispatch::{OwnerContext, OwnerQueue, OwnerThread};

// Error types
pub use error::{Error, Result};

// Event types
pub use event::{BridgeEvent, EventKind};

// Feedback types
pub use feedback::{FeedbackProvider, FeedbackTiming, NoopFeedback, SoundKind};

// Identifier types
pub use identifiers::{BusName, NodeId, ObjectPath};

// Registry types
pub use registry::{ObjectPathRegistry, RegistrySnapshot};

// Transport types
pub use transport::{BusClient, ConnectionState, MemoryBus, Transport, WebSocketTransport};

// Tree types
pub use tree::{
    AccessibleNode, AccessibleTree, ActionList, Capabilities, Capability, NodeBuilder, Rect, Role,
    StateFlag, StateSet, TreeChange, TreeObserver,
};
