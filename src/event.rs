//! Bridge events.
//!
//! Every event the bridge turns into a bus signal is also delivered to the
//! embedding application through an optional [`EventHandler`], together
//! with the connection events that have no target.
//!
//! | Kind | Target | Payload |
//! |------|--------|---------|
//! | `ChildAdded` | parent | index, child path |
//! | `ChildRemoved` | parent | index, child path |
//! | `StateChanged` | node | old and new state sets |
//! | `BoundsChanged` | node | new bounds |
//! | `FocusChanged` | node | previously focused path |
//! | `BusLost` | none | none |
//! | `BusRestored` | none | new unique name |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::identifiers::{BusName, ObjectPath};
use crate::tree::{Rect, StateSet};

// ============================================================================
// EventKind
// ============================================================================

/// Discriminant of a [`BridgeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A child was attached.
    ChildAdded,
    /// A child was removed.
    ChildRemoved,
    /// State flags changed.
    StateChanged,
    /// Bounds changed.
    BoundsChanged,
    /// Focus moved.
    FocusChanged,
    /// The bus connection was lost.
    BusLost,
    /// The bus connection was re-established.
    BusRestored,
}

// ============================================================================
// BridgeEvent
// ============================================================================

/// An event raised by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A child was attached under `target`.
    ChildAdded {
        /// Parent path.
        target: ObjectPath,
        /// Child position.
        index: usize,
        /// Child path.
        child: ObjectPath,
    },

    /// A child was removed from `target`.
    ChildRemoved {
        /// Parent path.
        target: ObjectPath,
        /// Former child position.
        index: usize,
        /// Former child path.
        child: ObjectPath,
    },

    /// State flags of `target` changed.
    StateChanged {
        /// Node path.
        target: ObjectPath,
        /// Previous states.
        old: StateSet,
        /// Current states.
        new: StateSet,
    },

    /// Bounds of `target` changed.
    BoundsChanged {
        /// Node path.
        target: ObjectPath,
        /// New bounds.
        bounds: Option<Rect>,
    },

    /// `target` received focus.
    FocusChanged {
        /// Node path.
        target: ObjectPath,
        /// Previously focused path, if it was registered.
        previous: Option<ObjectPath>,
    },

    /// The bus connection was lost. In-flight calls were cancelled.
    BusLost,

    /// The bus connection was re-established and every path republished.
    BusRestored {
        /// Unique name assigned by the bus.
        unique_name: BusName,
    },
}

impl BridgeEvent {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ChildAdded { .. } => EventKind::ChildAdded,
            Self::ChildRemoved { .. } => EventKind::ChildRemoved,
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::BoundsChanged { .. } => EventKind::BoundsChanged,
            Self::FocusChanged { .. } => EventKind::FocusChanged,
            Self::BusLost => EventKind::BusLost,
            Self::BusRestored { .. } => EventKind::BusRestored,
        }
    }

    /// Returns the target path, `None` for connection events.
    #[must_use]
    pub fn target(&self) -> Option<&ObjectPath> {
        match self {
            Self::ChildAdded { target, .. }
            | Self::ChildRemoved { target, .. }
            | Self::StateChanged { target, .. }
            | Self::BoundsChanged { target, .. }
            | Self::FocusChanged { target, .. } => Some(target),
            Self::BusLost | Self::BusRestored { .. } => None,
        }
    }
}

// ============================================================================
// EventHandler
// ============================================================================

/// Event handler callback type.
///
/// Called on the thread that raised the event: the owner thread for tree
/// events, a dispatch task for connection events. Must not block.
pub type EventHandler = Box<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Shared slot holding the current [`EventHandler`].
#[derive(Clone, Default)]
pub struct EventHub {
    handler: Arc<RwLock<Option<EventHandler>>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("has_handler", &self.handler.read().is_some())
            .finish()
    }
}

impl EventHub {
    /// Creates a hub without a handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the handler, replacing any previous one.
    pub fn set(&self, handler: EventHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Removes the handler.
    pub fn clear(&self) {
        *self.handler.write() = None;
    }

    /// Delivers an event to the handler, if any.
    pub fn emit(&self, event: &BridgeEvent) {
        trace!(kind = ?event.kind(), "Bridge event");
        if let Some(handler) = self.handler.read().as_ref() {
            handler(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
