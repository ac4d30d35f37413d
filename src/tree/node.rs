//! Accessible node data: roles, states, geometry, relations.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::NodeId;

use super::capability::{
    ActionHandler, Capabilities, CollectionHandler, ComponentHandler, SelectionHandler,
    TextHandler, ValueHandler,
};

// ============================================================================
// Attributes
// ============================================================================

/// Free-form string attributes (`toolkit`, `level`, `xml-roles`, ...).
///
/// Ordered map so equality does not depend on insertion order.
pub type Attributes = BTreeMap<String, String>;

// ============================================================================
// CustomCode
// ============================================================================

/// A wire code that no named variant claims.
///
/// Only obtainable through `from_code`, so an `Other` value never shadows a
/// named one and always decodes back to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomCode(u32);

impl CustomCode {
    /// Returns the raw code.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CustomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Role
// ============================================================================

macro_rules! roles {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal => $name:literal, )*) => {
        /// The accessibility role of a node.
        ///
        /// Codes are stable on the wire. Codes below [`Role::CUSTOM_BASE`]
        /// are reserved for the named variants; [`Role::Other`] carries
        /// toolkit-specific roles at or above it.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(from = "u32", into = "u32")]
        pub enum Role {
            $( $(#[$doc])* $variant, )*
            /// Toolkit-specific role code. Build with [`Role::custom`].
            Other(CustomCode),
        }

        impl Role {
            /// Returns the wire code of this role.
            #[must_use]
            pub const fn code(&self) -> u32 {
                match self {
                    $( Self::$variant => $code, )*
                    Self::Other(code) => code.get(),
                }
            }

            /// Maps a wire code back to a role.
            #[must_use]
            pub const fn from_code(code: u32) -> Self {
                match code {
                    $( $code => Self::$variant, )*
                    other => Self::Other(CustomCode(other)),
                }
            }

            /// Returns the human-readable role name.
            #[must_use]
            pub const fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                    Self::Other(_) => "unknown",
                }
            }
        }
    };
}

roles! {
    /// No specific role.
    #[default]
    Unknown = 0 => "unknown",
    /// The application root.
    Application = 1 => "application",
    /// A top-level window.
    Window = 2 => "window",
    /// A dialog box.
    Dialog = 3 => "dialog",
    /// An alert or message box.
    Alert = 4 => "alert",
    /// A push button.
    Button = 5 => "push button",
    /// A two-state check box.
    CheckBox = 6 => "check box",
    /// A mutually exclusive radio button.
    RadioButton = 7 => "radio button",
    /// A single-line text entry.
    TextInput = 8 => "entry",
    /// A multi-line text area.
    TextArea = 9 => "text",
    /// A static label.
    Label = 10 => "label",
    /// A hyperlink.
    Link = 11 => "link",
    /// An image.
    Image = 12 => "image",
    /// A progress indicator.
    ProgressBar = 13 => "progress bar",
    /// A slider.
    Slider = 14 => "slider",
    /// A spin button.
    SpinBox = 15 => "spin button",
    /// A combo box.
    ComboBox = 16 => "combo box",
    /// A list.
    List = 17 => "list",
    /// An item of a list.
    ListItem = 18 => "list item",
    /// A tree view.
    Tree = 19 => "tree",
    /// An item of a tree view.
    TreeItem = 20 => "tree item",
    /// A table.
    Table = 21 => "table",
    /// A table row.
    TableRow = 22 => "table row",
    /// A table cell.
    TableCell = 23 => "table cell",
    /// A menu bar.
    MenuBar = 24 => "menu bar",
    /// A menu.
    Menu = 25 => "menu",
    /// A menu item.
    MenuItem = 26 => "menu item",
    /// A tool bar.
    ToolBar = 27 => "tool bar",
    /// A status bar.
    StatusBar = 28 => "status bar",
    /// A list of tabs.
    TabList = 29 => "page tab list",
    /// One tab.
    Tab = 30 => "page tab",
    /// Content of a tab.
    TabPanel = 31 => "panel",
    /// A scroll bar.
    ScrollBar = 32 => "scroll bar",
    /// A generic grouping.
    Group = 33 => "grouping",
    /// A tooltip.
    Tooltip = 34 => "tool tip",
    /// A separator.
    Separator = 35 => "separator",
    /// A document.
    Document = 36 => "document frame",
    /// A heading.
    Heading = 37 => "heading",
}

impl Role {
    /// First code available for [`Role::Other`].
    pub const CUSTOM_BASE: u32 = 1000;

    /// Returns the role for a toolkit code.
    ///
    /// A code that belongs to a named variant yields that variant.
    #[inline]
    #[must_use]
    pub const fn custom(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<u32> for Role {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<Role> for u32 {
    fn from(role: Role) -> Self {
        role.code()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// StateFlag / StateSet
// ============================================================================

/// A single boolean state of a node.
///
/// The discriminant is the bit index in a [`StateSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateFlag {
    /// Window or application is active.
    Active = 0,
    /// Busy, contents changing.
    Busy = 1,
    /// Check box or toggle is on.
    Checked = 2,
    /// Text is editable.
    Editable = 3,
    /// Interactive.
    Enabled = 4,
    /// Can be expanded.
    Expandable = 5,
    /// Is expanded.
    Expanded = 6,
    /// Can receive keyboard focus.
    Focusable = 7,
    /// Has keyboard focus.
    Focused = 8,
    /// Value failed validation.
    Invalid = 9,
    /// Modal dialog.
    Modal = 10,
    /// Allows multiple selected children.
    MultiSelectable = 11,
    /// Toggle button is pressed.
    Pressed = 12,
    /// Cannot be modified.
    ReadOnly = 13,
    /// Input is required.
    Required = 14,
    /// Can be selected.
    Selectable = 15,
    /// Is selected.
    Selected = 16,
    /// Responds to user interaction.
    Sensitive = 17,
    /// Actually rendered on screen.
    Showing = 18,
    /// Would be rendered if its ancestors were.
    Visible = 19,
}

impl StateFlag {
    /// All flags in bit order.
    pub const ALL: [StateFlag; 20] = [
        Self::Active,
        Self::Busy,
        Self::Checked,
        Self::Editable,
        Self::Enabled,
        Self::Expandable,
        Self::Expanded,
        Self::Focusable,
        Self::Focused,
        Self::Invalid,
        Self::Modal,
        Self::MultiSelectable,
        Self::Pressed,
        Self::ReadOnly,
        Self::Required,
        Self::Selectable,
        Self::Selected,
        Self::Sensitive,
        Self::Showing,
        Self::Visible,
    ];

    /// Returns the mask bit for this flag.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }

    /// Returns the lowercase state name used in signal details.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Checked => "checked",
            Self::Editable => "editable",
            Self::Enabled => "enabled",
            Self::Expandable => "expandable",
            Self::Expanded => "expanded",
            Self::Focusable => "focusable",
            Self::Focused => "focused",
            Self::Invalid => "invalid",
            Self::Modal => "modal",
            Self::MultiSelectable => "multiselectable",
            Self::Pressed => "pressed",
            Self::ReadOnly => "read-only",
            Self::Required => "required",
            Self::Selectable => "selectable",
            Self::Selected => "selected",
            Self::Sensitive => "sensitive",
            Self::Showing => "showing",
            Self::Visible => "visible",
        }
    }
}

/// Bitmask of [`StateFlag`]s.
///
/// All 64 bits survive the wire, including bits with no named flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSet(u64);

impl StateSet {
    /// The empty set.
    pub const EMPTY: StateSet = StateSet(0);

    /// Wraps raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Returns `true` if the flag is set.
    #[inline]
    #[must_use]
    pub const fn contains(&self, flag: StateFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains_all(&self, other: StateSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn intersects(&self, other: StateSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the set with `flag` added.
    #[inline]
    #[must_use]
    pub const fn with(self, flag: StateFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    /// Adds or removes `flag`.
    #[inline]
    pub fn set(&mut self, flag: StateFlag, on: bool) {
        if on {
            self.0 |= flag.bit();
        } else {
            self.0 &= !flag.bit();
        }
    }

    /// Returns `true` if no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the named flags that are set.
    pub fn iter(&self) -> impl Iterator<Item = StateFlag> + '_ {
        StateFlag::ALL.into_iter().filter(|flag| self.contains(*flag))
    }

    /// Returns flags whose value differs between `self` and `other`.
    #[must_use]
    pub fn changed(&self, other: StateSet) -> Vec<StateFlag> {
        let diff = StateSet(self.0 ^ other.0);
        diff.iter().collect()
    }
}

impl FromIterator<StateFlag> for StateSet {
    fn from_iter<I: IntoIterator<Item = StateFlag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, StateSet::with)
    }
}

// ============================================================================
// Rect
// ============================================================================

/// Screen-coordinate bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Rect {
    /// Creates a rectangle.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns `true` if the point lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let right = i64::from(self.x) + i64::from(self.width);
        let bottom = i64::from(self.y) + i64::from(self.height);
        x >= self.x && y >= self.y && i64::from(x) < right && i64::from(y) < bottom
    }
}

// ============================================================================
// Relations
// ============================================================================

/// Kind of relation between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum RelationType {
    /// Target labels this node.
    LabelledBy,
    /// This node labels the target.
    LabelFor,
    /// This node controls the target.
    ControllerFor,
    /// Target controls this node.
    ControlledBy,
    /// This node is a member of the target group.
    MemberOf,
    /// Reading order continues at the target.
    FlowsTo,
    /// Reading order arrives from the target.
    FlowsFrom,
    /// Target describes this node.
    DescribedBy,
    /// This node describes the target.
    DescriptionFor,
    /// Target holds details for this node.
    Details,
    /// Target is a popup or embedded object for this node.
    Embeds,
    /// Unrecognised relation code. Build with [`RelationType::from_code`].
    Other(CustomCode),
}

impl RelationType {
    /// Returns the wire code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::LabelledBy => 1,
            Self::LabelFor => 2,
            Self::ControllerFor => 3,
            Self::ControlledBy => 4,
            Self::MemberOf => 5,
            Self::FlowsTo => 6,
            Self::FlowsFrom => 7,
            Self::DescribedBy => 8,
            Self::DescriptionFor => 9,
            Self::Details => 10,
            Self::Embeds => 11,
            Self::Other(code) => code.get(),
        }
    }

    /// Maps a wire code back to a relation type.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::LabelledBy,
            2 => Self::LabelFor,
            3 => Self::ControllerFor,
            4 => Self::ControlledBy,
            5 => Self::MemberOf,
            6 => Self::FlowsTo,
            7 => Self::FlowsFrom,
            8 => Self::DescribedBy,
            9 => Self::DescriptionFor,
            10 => Self::Details,
            11 => Self::Embeds,
            other => Self::Other(CustomCode(other)),
        }
    }
}

impl From<u32> for RelationType {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<RelationType> for u32 {
    fn from(kind: RelationType) -> Self {
        kind.code()
    }
}

/// A relation from one node to a set of targets within the same tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation kind.
    pub kind: RelationType,
    /// Target node ids.
    pub targets: Vec<NodeId>,
}

// ============================================================================
// AccessibleNode
// ============================================================================

/// One node of the accessible tree.
///
/// Nodes are created through a [`NodeBuilder`] and live in the
/// [`AccessibleTree`](super::AccessibleTree) arena. Parent and children are
/// arena ids, so a child never keeps its parent alive.
pub struct AccessibleNode {
    pub(crate) id: NodeId,
    pub(crate) role: Role,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) states: StateSet,
    pub(crate) bounds: Option<Rect>,
    pub(crate) attributes: Attributes,
    pub(crate) relations: Vec<Relation>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) capabilities: Capabilities,
}

impl fmt::Debug for AccessibleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessibleNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("name", &self.name)
            .field("states", &self.states)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("capabilities", &self.capabilities.set())
            .finish_non_exhaustive()
    }
}

impl AccessibleNode {
    /// Starts building a node with the given role.
    #[inline]
    #[must_use]
    pub fn builder(role: Role) -> NodeBuilder {
        NodeBuilder::new(role)
    }

    /// Returns the node id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the role.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the accessible name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the accessible description.
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the state set.
    #[inline]
    #[must_use]
    pub fn states(&self) -> StateSet {
        self.states
    }

    /// Returns the bounding box, if the node has one.
    #[inline]
    #[must_use]
    pub fn bounds(&self) -> Option<Rect> {
        self.bounds
    }

    /// Returns the attribute map.
    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the relations.
    #[inline]
    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Returns the parent id.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns the ordered child ids.
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Returns the capability handlers.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

// ============================================================================
// NodeBuilder
// ============================================================================

/// Fluent builder for an [`AccessibleNode`].
///
/// # Example
///
/// ```ignore
/// let ok = AccessibleNode::builder(Role::Button)
///     .name("OK")
///     .state(StateFlag::Enabled)
///     .bounds(Rect::new(10, 10, 80, 24))
///     .action(ActionList::new().with("press", || true));
/// let id = tree.insert(dialog, None, ok)?;
/// ```
pub struct NodeBuilder {
    pub(crate) role: Role,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) states: StateSet,
    pub(crate) bounds: Option<Rect>,
    pub(crate) attributes: Attributes,
    pub(crate) relations: Vec<Relation>,
    pub(crate) capabilities: Capabilities,
}

impl NodeBuilder {
    /// Creates a builder for the given role.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            name: String::new(),
            description: String::new(),
            states: StateSet::EMPTY,
            bounds: None,
            attributes: Attributes::new(),
            relations: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    /// Sets the accessible name.
    #[inline]
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the accessible description.
    #[inline]
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a state flag.
    #[inline]
    #[must_use]
    pub fn state(mut self, flag: StateFlag) -> Self {
        self.states.set(flag, true);
        self
    }

    /// Replaces the whole state set.
    #[inline]
    #[must_use]
    pub fn states(mut self, states: StateSet) -> Self {
        self.states = states;
        self
    }

    /// Sets the bounding box.
    #[inline]
    #[must_use]
    pub fn bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Adds an attribute.
    #[inline]
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds a relation.
    #[inline]
    #[must_use]
    pub fn relation(mut self, kind: RelationType, targets: Vec<NodeId>) -> Self {
        self.relations.push(Relation { kind, targets });
        self
    }

    /// Attaches an Action handler.
    #[inline]
    #[must_use]
    pub fn action(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.capabilities.action = Some(Box::new(handler));
        self
    }

    /// Attaches a Text handler.
    #[inline]
    #[must_use]
    pub fn text(mut self, handler: impl TextHandler + 'static) -> Self {
        self.capabilities.text = Some(Box::new(handler));
        self
    }

    /// Attaches a Value handler.
    #[inline]
    #[must_use]
    pub fn value(mut self, handler: impl ValueHandler + 'static) -> Self {
        self.capabilities.value = Some(Box::new(handler));
        self
    }

    /// Attaches a Selection handler.
    #[inline]
    #[must_use]
    pub fn selection(mut self, handler: impl SelectionHandler + 'static) -> Self {
        self.capabilities.selection = Some(Box::new(handler));
        self
    }

    /// Attaches a Component handler.
    #[inline]
    #[must_use]
    pub fn component(mut self, handler: impl ComponentHandler + 'static) -> Self {
        self.capabilities.component = Some(Box::new(handler));
        self
    }

    /// Attaches a Collection handler.
    #[inline]
    #[must_use]
    pub fn collection(mut self, handler: impl CollectionHandler + 'static) -> Self {
        self.capabilities.collection = Some(Box::new(handler));
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_codes_roundtrip() {
        for code in 0..=37 {
            assert_eq!(Role::from_code(code).code(), code);
        }
        assert_eq!(Role::from_code(1234).code(), 1234);
        assert!(matches!(Role::from_code(1234), Role::Other(_)));
        assert_eq!(Role::Button.name(), "push button");
    }

    #[test]
    fn test_custom_role_never_shadows_named() {
        assert_eq!(Role::custom(Role::Button.code()), Role::Button);
        assert_eq!(Role::custom(Role::CUSTOM_BASE).code(), Role::CUSTOM_BASE);
        assert_ne!(Role::custom(Role::CUSTOM_BASE), Role::Unknown);
        assert_eq!(RelationType::from_code(1), RelationType::LabelledBy);
    }

    #[test]
    fn test_state_set_ops() {
        let mut states = StateSet::EMPTY
            .with(StateFlag::Enabled)
            .with(StateFlag::Focusable);
        assert!(states.contains(StateFlag::Enabled));
        assert!(!states.contains(StateFlag::Focused));

        states.set(StateFlag::Focused, true);
        states.set(StateFlag::Enabled, false);
        let flags: Vec<_> = states.iter().collect();
        assert_eq!(flags, vec![StateFlag::Focusable, StateFlag::Focused]);
    }

    #[test]
    fn test_state_set_changed() {
        let old = StateSet::from_iter([StateFlag::Enabled, StateFlag::Checked]);
        let new = StateSet::from_iter([StateFlag::Enabled, StateFlag::Focused]);
        assert_eq!(old.changed(new), vec![StateFlag::Checked, StateFlag::Focused]);
    }

    #[test]
    fn test_rect_contains() {
        let rect = Rect::new(10, 20, 30, 40);
        assert!(rect.contains(10, 20));
        assert!(rect.contains(39, 59));
        assert!(!rect.contains(40, 20));
        assert!(!rect.contains(9, 25));
    }

    #[test]
    fn test_rect_contains_no_overflow() {
        let rect = Rect::new(i32::MAX - 1, 0, i32::MAX, 1);
        assert!(rect.contains(i32::MAX, 0));
    }

    #[test]
    fn test_relation_codes() {
        assert_eq!(RelationType::from_code(RelationType::LabelledBy.code()), RelationType::LabelledBy);
        let other = RelationType::from_code(99);
        assert!(matches!(other, RelationType::Other(code) if code.get() == 99));
    }

    #[test]
    fn test_builder_collects_fields() {
        let builder = AccessibleNode::builder(Role::CheckBox)
            .name("Wrap lines")
            .state(StateFlag::Checked)
            .attribute("toolkit", "lattice")
            .bounds(Rect::new(0, 0, 16, 16));
        assert_eq!(builder.role, Role::CheckBox);
        assert_eq!(builder.name, "Wrap lines");
        assert!(builder.states.contains(StateFlag::Checked));
        assert_eq!(builder.attributes.get("toolkit").map(String::as_str), Some("lattice"));
        assert!(builder.capabilities.set().is_empty());
    }
}
