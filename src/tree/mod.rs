//! The application-owned accessible tree.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AccessibleTree`] | Arena of nodes, mutated on the owner thread |
//! | [`AccessibleNode`] | Role, states, geometry, relations, handlers |
//! | [`NodeBuilder`] | Fluent node construction |
//! | [`TreeObserver`] | Receives every [`TreeChange`] |
//! | [`Capability`] | Tag of a handler slot |

// ============================================================================
// Submodules
// ============================================================================

/// Capability tags and handler traits.
pub mod capability;

/// Node data.
pub mod node;

/// The arena.
#[allow(clippy::module_inception)]
pub mod tree;

// ============================================================================
// Re-exports
// ============================================================================

pub use capability::{
    ActionHandler, ActionList, Capabilities, Capability, CapabilitySet, CollectionHandler,
    ComponentHandler, Focusable, IndexSelection, RangeValue, SelectionHandler, StaticText,
    SubtreeCollection, TextHandler, ValueHandler,
};
pub use node::{
    AccessibleNode, Attributes, CustomCode, NodeBuilder, Rect, Relation, RelationType, Role, StateFlag,
    StateSet,
};
pub use tree::{AccessibleTree, ObserverId, TreeChange, TreeObserver};
