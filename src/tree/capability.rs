//! Capability tags and per-capability handler traits.
//!
//! A node declares capabilities by carrying a handler for them. Dispatch is
//! a lookup by tag: the [`Capabilities`] holder keeps one optional boxed
//! handler per [`Capability`].
//!
//! | Capability | Interface | Handler |
//! |------------|-----------|---------|
//! | Action | `org.a11y.atspi.Action` | [`ActionHandler`] |
//! | Text | `org.a11y.atspi.Text` | [`TextHandler`] |
//! | Value | `org.a11y.atspi.Value` | [`ValueHandler`] |
//! | Selection | `org.a11y.atspi.Selection` | [`SelectionHandler`] |
//! | Component | `org.a11y.atspi.Component` | [`ComponentHandler`] |
//! | Collection | `org.a11y.atspi.Collection` | [`CollectionHandler`] |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use crate::protocol::interfaces;

use super::node::AccessibleNode;

// ============================================================================
// Capability
// ============================================================================

/// A named behaviour a node may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    /// Named, invocable actions.
    Action = 0,
    /// Read-only text content with a caret.
    Text = 1,
    /// Numeric value in a range.
    Value = 2,
    /// Selectable children.
    Selection = 3,
    /// On-screen geometry and focus.
    Component = 4,
    /// Queries over the node's subtree.
    Collection = 5,
}

impl Capability {
    /// All capabilities.
    pub const ALL: [Capability; 6] = [
        Self::Action,
        Self::Text,
        Self::Value,
        Self::Selection,
        Self::Component,
        Self::Collection,
    ];

    /// Returns the bus interface name.
    #[must_use]
    pub const fn interface(self) -> &'static str {
        match self {
            Self::Action => interfaces::ACTION,
            Self::Text => interfaces::TEXT,
            Self::Value => interfaces::VALUE,
            Self::Selection => interfaces::SELECTION,
            Self::Component => interfaces::COMPONENT,
            Self::Collection => interfaces::COLLECTION,
        }
    }

    /// Maps an interface name back to a capability.
    #[must_use]
    pub fn from_interface(interface: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cap| cap.interface() == interface)
    }

    #[inline]
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// CapabilitySet
// ============================================================================

/// Set of [`Capability`] tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    /// Returns the set with `cap` added.
    #[inline]
    #[must_use]
    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    /// Returns `true` if `cap` is in the set.
    #[inline]
    #[must_use]
    pub const fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Returns `true` if the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the capabilities in the set.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|cap| self.contains(*cap))
    }

    /// Returns every interface a node with this set exposes.
    ///
    /// The Accessible interface is always first.
    #[must_use]
    pub fn interfaces(&self) -> Vec<String> {
        std::iter::once(interfaces::ACCESSIBLE)
            .chain(self.iter().map(Capability::interface))
            .map(str::to_string)
            .collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, CapabilitySet::with)
    }
}

// ============================================================================
// Handler Traits
// ============================================================================

/// Handler for the Action capability.
pub trait ActionHandler: Send {
    /// Number of actions.
    fn count(&self) -> usize;

    /// Name of the action at `index`.
    fn name(&self, index: usize) -> Option<String>;

    /// Localized description of the action at `index`.
    fn description(&self, _index: usize) -> Option<String> {
        None
    }

    /// Key binding of the action at `index`.
    fn key_binding(&self, _index: usize) -> Option<String> {
        None
    }

    /// Performs the action at `index`. Returns `false` if it was refused.
    fn invoke(&mut self, index: usize) -> bool;
}

/// Handler for the Text capability.
pub trait TextHandler: Send {
    /// Full text content.
    fn text(&self) -> String;

    /// Caret offset in characters, `-1` if there is no caret.
    fn caret_offset(&self) -> i32 {
        -1
    }

    /// Moves the caret. Returns `false` if refused.
    fn set_caret_offset(&mut self, _offset: i32) -> bool {
        false
    }
}

/// Handler for the Value capability.
pub trait ValueHandler: Send {
    /// Current value.
    fn current(&self) -> f64;

    /// Lower bound.
    fn minimum(&self) -> f64;

    /// Upper bound.
    fn maximum(&self) -> f64;

    /// Smallest step, `0.0` for continuous values.
    fn increment(&self) -> f64 {
        0.0
    }

    /// Sets the value. Returns `false` if refused.
    fn set_current(&mut self, value: f64) -> bool;
}

/// Handler for the Selection capability.
///
/// Indices are child indices. The bridge validates them against the
/// node's child count before calling in, and mirrors the resulting
/// selection into the children's `Selected` state.
pub trait SelectionHandler: Send {
    /// Indices of the selected children, ascending.
    fn selected(&self) -> Vec<usize>;

    /// Selects the child at `index`.
    fn select(&mut self, index: usize) -> bool;

    /// Deselects the child at `index`.
    fn deselect(&mut self, index: usize) -> bool;

    /// Deselects everything.
    fn clear(&mut self) -> bool;
}

/// Handler for the Component capability.
///
/// Geometry comes from the node's bounds; the handler decides focus.
pub trait ComponentHandler: Send {
    /// Asks for keyboard focus. Returns `false` if refused.
    fn grab_focus(&mut self) -> bool {
        true
    }
}

/// Handler for the Collection capability.
///
/// The bridge walks the subtree and applies the match rule; the handler
/// can veto candidates and bound the walk.
pub trait CollectionHandler: Send {
    /// Whether `node` may appear in results.
    fn accepts(&self, _node: &AccessibleNode) -> bool {
        true
    }

    /// Maximum depth below the collection root, `None` for unbounded.
    fn max_depth(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Per-node handler slots.
#[derive(Default)]
pub struct Capabilities {
    pub(crate) action: Option<Box<dyn ActionHandler>>,
    pub(crate) text: Option<Box<dyn TextHandler>>,
    pub(crate) value: Option<Box<dyn ValueHandler>>,
    pub(crate) selection: Option<Box<dyn SelectionHandler>>,
    pub(crate) component: Option<Box<dyn ComponentHandler>>,
    pub(crate) collection: Option<Box<dyn CollectionHandler>>,
}

impl Capabilities {
    /// Returns the declared capability set.
    #[must_use]
    pub fn set(&self) -> CapabilitySet {
        let mut set = CapabilitySet::EMPTY;
        if self.action.is_some() {
            set = set.with(Capability::Action);
        }
        if self.text.is_some() {
            set = set.with(Capability::Text);
        }
        if self.value.is_some() {
            set = set.with(Capability::Value);
        }
        if self.selection.is_some() {
            set = set.with(Capability::Selection);
        }
        if self.component.is_some() {
            set = set.with(Capability::Component);
        }
        if self.collection.is_some() {
            set = set.with(Capability::Collection);
        }
        set
    }

    /// Returns the Action handler.
    #[inline]
    #[must_use]
    pub fn action(&self) -> Option<&dyn ActionHandler> {
        self.action.as_deref()
    }

    /// Returns the Text handler.
    #[inline]
    #[must_use]
    pub fn text(&self) -> Option<&dyn TextHandler> {
        self.text.as_deref()
    }

    /// Returns the Value handler.
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&dyn ValueHandler> {
        self.value.as_deref()
    }

    /// Returns the Selection handler.
    #[inline]
    #[must_use]
    pub fn selection(&self) -> Option<&dyn SelectionHandler> {
        self.selection.as_deref()
    }

    /// Returns the Collection handler.
    #[inline]
    #[must_use]
    pub fn collection(&self) -> Option<&dyn CollectionHandler> {
        self.collection.as_deref()
    }
}

// ============================================================================
// Stock Handlers
// ============================================================================

/// One action of an [`ActionList`].
pub struct NamedAction {
    name: String,
    description: Option<String>,
    key_binding: Option<String>,
    callback: Box<dyn FnMut() -> bool + Send>,
}

/// [`ActionHandler`] backed by a list of closures.
#[derive(Default)]
pub struct ActionList {
    actions: Vec<NamedAction>,
}

impl ActionList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, callback: impl FnMut() -> bool + Send + 'static) -> Self {
        self.actions.push(NamedAction {
            name: name.into(),
            description: None,
            key_binding: None,
            callback: Box::new(callback),
        });
        self
    }

    /// Sets the description of the most recently added action.
    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.actions.last_mut() {
            last.description = Some(description.into());
        }
        self
    }

    /// Sets the key binding of the most recently added action.
    #[must_use]
    pub fn bound_to(mut self, key_binding: impl Into<String>) -> Self {
        if let Some(last) = self.actions.last_mut() {
            last.key_binding = Some(key_binding.into());
        }
        self
    }
}

impl ActionHandler for ActionList {
    fn count(&self) -> usize {
        self.actions.len()
    }

    fn name(&self, index: usize) -> Option<String> {
        self.actions.get(index).map(|a| a.name.clone())
    }

    fn description(&self, index: usize) -> Option<String> {
        self.actions.get(index).and_then(|a| a.description.clone())
    }

    fn key_binding(&self, index: usize) -> Option<String> {
        self.actions.get(index).and_then(|a| a.key_binding.clone())
    }

    fn invoke(&mut self, index: usize) -> bool {
        match self.actions.get_mut(index) {
            Some(action) => (action.callback)(),
            None => false,
        }
    }
}

/// [`TextHandler`] over an owned string.
#[derive(Debug, Clone, Default)]
pub struct StaticText {
    text: String,
    caret: i32,
}

impl StaticText {
    /// Creates a text handler with the caret at the start.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            caret: 0,
        }
    }
}

impl TextHandler for StaticText {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn caret_offset(&self) -> i32 {
        self.caret
    }

    fn set_caret_offset(&mut self, offset: i32) -> bool {
        let len = i32::try_from(self.text.chars().count()).unwrap_or(i32::MAX);
        if (0..=len).contains(&offset) {
            self.caret = offset;
            true
        } else {
            false
        }
    }
}

/// [`ValueHandler`] with clamping to `[minimum, maximum]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeValue {
    current: f64,
    minimum: f64,
    maximum: f64,
    increment: f64,
}

impl RangeValue {
    /// Creates a range; `current` is clamped into it.
    #[must_use]
    pub fn new(minimum: f64, maximum: f64, current: f64) -> Self {
        Self {
            current: current.clamp(minimum, maximum),
            minimum,
            maximum,
            increment: 0.0,
        }
    }

    /// Sets the step size.
    #[must_use]
    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }
}

impl ValueHandler for RangeValue {
    fn current(&self) -> f64 {
        self.current
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }

    fn increment(&self) -> f64 {
        self.increment
    }

    fn set_current(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.current = value.clamp(self.minimum, self.maximum);
        true
    }
}

/// [`SelectionHandler`] tracking selected indices.
#[derive(Debug, Clone, Default)]
pub struct IndexSelection {
    selected: BTreeSet<usize>,
    multiple: bool,
}

impl IndexSelection {
    /// Single-selection container.
    #[must_use]
    pub fn single() -> Self {
        Self::default()
    }

    /// Multi-selection container.
    #[must_use]
    pub fn multiple() -> Self {
        Self {
            selected: BTreeSet::new(),
            multiple: true,
        }
    }
}

impl SelectionHandler for IndexSelection {
    fn selected(&self) -> Vec<usize> {
        self.selected.iter().copied().collect()
    }

    fn select(&mut self, index: usize) -> bool {
        if !self.multiple {
            self.selected.clear();
        }
        self.selected.insert(index);
        true
    }

    fn deselect(&mut self, index: usize) -> bool {
        self.selected.remove(&index)
    }

    fn clear(&mut self) -> bool {
        self.selected.clear();
        true
    }
}

/// [`ComponentHandler`] that always accepts focus.
#[derive(Debug, Clone, Copy, Default)]
pub struct Focusable;

impl ComponentHandler for Focusable {}

/// [`CollectionHandler`] over the whole subtree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtreeCollection;

impl CollectionHandler for SubtreeCollection {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_capability_interfaces() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_interface(cap.interface()), Some(cap));
        }
        assert_eq!(Capability::from_interface(interfaces::ACCESSIBLE), None);
    }

    #[test]
    fn test_capability_set() {
        let set = CapabilitySet::from_iter([Capability::Action, Capability::Component]);
        assert!(set.contains(Capability::Action));
        assert!(!set.contains(Capability::Text));
        assert_eq!(
            set.interfaces(),
            vec![
                interfaces::ACCESSIBLE.to_string(),
                interfaces::ACTION.to_string(),
                interfaces::COMPONENT.to_string(),
            ]
        );
    }

    #[test]
    fn test_capabilities_set_follows_slots() {
        let mut caps = Capabilities::default();
        assert!(caps.set().is_empty());
        caps.text = Some(Box::new(StaticText::new("hi")));
        caps.value = Some(Box::new(RangeValue::new(0.0, 1.0, 0.5)));
        let set = caps.set();
        assert!(set.contains(Capability::Text));
        assert!(set.contains(Capability::Value));
        assert!(!set.contains(Capability::Action));
    }

    #[test]
    fn test_action_list_invokes_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut actions = ActionList::new()
            .with("press", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
            .described("Activate the button")
            .bound_to("Return");

        assert_eq!(actions.count(), 1);
        assert_eq!(actions.name(0).as_deref(), Some("press"));
        assert_eq!(actions.description(0).as_deref(), Some("Activate the button"));
        assert_eq!(actions.key_binding(0).as_deref(), Some("Return"));
        assert!(actions.invoke(0));
        assert!(!actions.invoke(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_static_text_caret_bounds() {
        let mut text = StaticText::new("héllo");
        assert!(text.set_caret_offset(5));
        assert!(!text.set_caret_offset(6));
        assert!(!text.set_caret_offset(-1));
        assert_eq!(text.caret_offset(), 5);
    }

    #[test]
    fn test_range_value_clamps() {
        let mut value = RangeValue::new(0.0, 10.0, 42.0);
        assert_eq!(value.current(), 10.0);
        assert!(value.set_current(-3.0));
        assert_eq!(value.current(), 0.0);
        assert!(!value.set_current(f64::NAN));
    }

    #[test]
    fn test_index_selection_single_replaces() {
        let mut sel = IndexSelection::single();
        sel.select(1);
        sel.select(3);
        assert_eq!(sel.selected(), vec![3]);

        let mut multi = IndexSelection::multiple();
        multi.select(1);
        multi.select(3);
        assert_eq!(multi.selected(), vec![1, 3]);
        assert!(multi.deselect(1));
        assert!(!multi.deselect(1));
    }
}
