//! Bus interface and member names.
//!
//! These strings are the stable contract with remote clients.

// ============================================================================
// Interfaces
// ============================================================================

/// Always available on every registered node.
pub const ACCESSIBLE: &str = "org.a11y.atspi.Accessible";

/// Named, invocable actions.
pub const ACTION: &str = "org.a11y.atspi.Action";

/// Text content and caret.
pub const TEXT: &str = "org.a11y.atspi.Text";

/// Numeric value.
pub const VALUE: &str = "org.a11y.atspi.Value";

/// Child selection.
pub const SELECTION: &str = "org.a11y.atspi.Selection";

/// Geometry and focus.
pub const COMPONENT: &str = "org.a11y.atspi.Component";

/// Subtree queries.
pub const COLLECTION: &str = "org.a11y.atspi.Collection";

// ============================================================================
// Event Interfaces
// ============================================================================

/// Object events (children, state, bounds).
pub const EVENT_OBJECT: &str = "org.a11y.atspi.Event.Object";

/// Focus events.
pub const EVENT_FOCUS: &str = "org.a11y.atspi.Event.Focus";

/// Signal members.
pub mod signals {
    /// A child was added or removed. Detail is `add` or `remove`.
    pub const CHILDREN_CHANGED: &str = "ChildrenChanged";

    /// A state flag changed.
    pub const STATE_CHANGED: &str = "StateChanged";

    /// The bounding box changed.
    pub const BOUNDS_CHANGED: &str = "BoundsChanged";

    /// Keyboard focus moved to the emitting object.
    pub const FOCUS: &str = "Focus";

    /// `ChildrenChanged` detail for an added child.
    pub const DETAIL_ADD: &str = "add";

    /// `ChildrenChanged` detail for a removed child.
    pub const DETAIL_REMOVE: &str = "remove";
}
