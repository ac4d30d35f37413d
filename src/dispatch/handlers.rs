//! Per-interface call execution on the owner thread.
//!
//! Every function here runs with exclusive access to the tree. Handlers
//! never apply tree effects themselves: they return a [`TreeEffect`] that
//! the executor applies only if the node is still alive and registered.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::identifiers::{BusName, NodeId};
use crate::protocol::{
    IntoWire, MatchRule, MatchType, ObjectRef, WireRelation, WireValue,
};
use crate::registry::RegistrySnapshot;
use crate::tree::{AccessibleNode, AccessibleTree, Capability};

use super::request::{
    AccessibleRequest, ActionRequest, CollectionRequest, ComponentRequest, MethodRequest,
    SelectionRequest, TextRequest, ValueRequest,
};

// ============================================================================
// Outcome
// ============================================================================

/// A tree mutation requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TreeEffect {
    /// Move keyboard focus to the node.
    Focus,
    /// Mirror the selection handler into children's `Selected` state.
    SyncSelection,
}

/// Reply value plus an optional deferred effect.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outcome {
    pub(crate) value: WireValue,
    pub(crate) effect: Option<TreeEffect>,
}

impl Outcome {
    fn value(value: impl IntoWire) -> Self {
        Self {
            value: value.into_wire(),
            effect: None,
        }
    }

    fn effect_if(value: bool, effect: TreeEffect) -> Self {
        Self {
            value: value.into_wire(),
            effect: value.then_some(effect),
        }
    }
}

// ============================================================================
// HandlerContext
// ============================================================================

/// Registry view and naming used to build object references.
pub(crate) struct HandlerContext<'a> {
    pub(crate) snapshot: &'a RegistrySnapshot,
    pub(crate) identity: &'a BusName,
}

impl HandlerContext<'_> {
    /// Reference to `node`, or the null reference if it is not registered.
    fn reference(&self, node: NodeId) -> ObjectRef {
        self.registered_reference(node)
            .unwrap_or_else(ObjectRef::null)
    }

    fn registered_reference(&self, node: NodeId) -> Option<ObjectRef> {
        self.snapshot
            .path_of(node)
            .map(|path| ObjectRef::new(self.identity.as_str(), path.clone()))
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Executes one request against `node`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the node is gone.
///
/// # Panics
///
/// Panics if the node declares the request's capability without carrying
/// a handler for it.
pub(crate) fn handle(
    tree: &mut AccessibleTree,
    node: NodeId,
    request: &MethodRequest,
    ctx: &HandlerContext<'_>,
) -> Result<Outcome> {
    match request {
        MethodRequest::Accessible(r) => accessible(tree, node, *r, ctx).map(Outcome::value),
        MethodRequest::Action(r) => action(tree, node, *r),
        MethodRequest::Text(r) => text(tree, node, *r),
        MethodRequest::Value(r) => value(tree, node, *r),
        MethodRequest::Selection(r) => selection(tree, node, *r, ctx),
        MethodRequest::Component(r) => component(tree, node, *r),
        MethodRequest::Collection(r) => collection(tree, node, r, ctx).map(Outcome::value),
    }
}

fn missing_handler(node: NodeId, capability: Capability) -> ! {
    panic!("node {node} declares {capability} without a handler")
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn index(i: i32) -> Option<usize> {
    usize::try_from(i).ok()
}

fn lookup(tree: &AccessibleTree, node: NodeId) -> Result<&AccessibleNode> {
    tree.node(node).ok_or_else(|| Error::not_found(node))
}

fn lookup_mut(tree: &mut AccessibleTree, node: NodeId) -> Result<&mut AccessibleNode> {
    tree.node_mut(node).ok_or_else(|| Error::not_found(node))
}

// ============================================================================
// Accessible
// ============================================================================

fn accessible(
    tree: &AccessibleTree,
    id: NodeId,
    request: AccessibleRequest,
    ctx: &HandlerContext<'_>,
) -> Result<WireValue> {
    let node = lookup(tree, id)?;
    let value = match request {
        AccessibleRequest::GetRole => node.role().into_wire(),
        AccessibleRequest::GetRoleName => node.role().name().into_wire(),
        AccessibleRequest::GetName => node.name().into_wire(),
        AccessibleRequest::GetDescription => node.description().into_wire(),
        AccessibleRequest::GetState => node.states().into_wire(),
        AccessibleRequest::GetAttributes => node.attributes().clone().into_wire(),
        AccessibleRequest::GetChildCount => count(node.children().len()).into_wire(),
        AccessibleRequest::GetChildAtIndex { index: i } => index(i)
            .and_then(|i| node.children().get(i))
            .map_or_else(ObjectRef::null, |child| ctx.reference(*child))
            .into_wire(),
        AccessibleRequest::GetChildren => node
            .children()
            .iter()
            .map(|child| ctx.reference(*child))
            .collect::<Vec<_>>()
            .into_wire(),
        AccessibleRequest::GetParent => node
            .parent()
            .map_or_else(ObjectRef::null, |parent| ctx.reference(parent))
            .into_wire(),
        AccessibleRequest::GetIndexInParent => {
            tree.index_in_parent(id).map_or(-1, count).into_wire()
        }
        AccessibleRequest::GetRelationSet => node
            .relations()
            .iter()
            .map(|relation| WireRelation {
                kind: relation.kind,
                targets: relation
                    .targets
                    .iter()
                    .filter_map(|target| ctx.registered_reference(*target))
                    .collect(),
            })
            .collect::<Vec<_>>()
            .into_wire(),
        AccessibleRequest::GetInterfaces => node.capabilities().set().interfaces().into_wire(),
    };
    Ok(value)
}

// ============================================================================
// Action
// ============================================================================

fn action(tree: &mut AccessibleTree, id: NodeId, request: ActionRequest) -> Result<Outcome> {
    let node = lookup_mut(tree, id)?;
    let handler = node
        .capabilities
        .action
        .as_deref_mut()
        .unwrap_or_else(|| missing_handler(id, Capability::Action));

    Ok(match request {
        ActionRequest::GetNActions => Outcome::value(count(handler.count())),
        ActionRequest::GetName { index: i } => {
            Outcome::value(index(i).and_then(|i| handler.name(i)).unwrap_or_default())
        }
        ActionRequest::GetDescription { index: i } => {
            Outcome::value(index(i).and_then(|i| handler.description(i)).unwrap_or_default())
        }
        ActionRequest::GetKeyBinding { index: i } => {
            Outcome::value(index(i).and_then(|i| handler.key_binding(i)).unwrap_or_default())
        }
        ActionRequest::DoAction { index: i } => {
            let done = index(i).is_some_and(|i| i < handler.count() && handler.invoke(i));
            Outcome::value(done)
        }
    })
}

// ============================================================================
// Text
// ============================================================================

fn text(tree: &mut AccessibleTree, id: NodeId, request: TextRequest) -> Result<Outcome> {
    let node = lookup_mut(tree, id)?;
    let handler = node
        .capabilities
        .text
        .as_deref_mut()
        .unwrap_or_else(|| missing_handler(id, Capability::Text));

    Ok(match request {
        TextRequest::GetCharacterCount => Outcome::value(count(handler.text().chars().count())),
        TextRequest::GetText { start, end } => {
            Outcome::value(char_range(&handler.text(), start, end))
        }
        TextRequest::GetCaretOffset => Outcome::value(handler.caret_offset()),
        TextRequest::SetCaretOffset { offset } => Outcome::value(handler.set_caret_offset(offset)),
    })
}

/// Substring by character offsets, clamped. `end < 0` means the end.
fn char_range(text: &str, start: i32, end: i32) -> String {
    let len = text.chars().count();
    let start = index(start).unwrap_or(0).min(len);
    let end = if end < 0 { len } else { index(end).unwrap_or(0).min(len) };
    if end <= start {
        return String::new();
    }
    text.chars().skip(start).take(end - start).collect()
}

// ============================================================================
// Value
// ============================================================================

fn value(tree: &mut AccessibleTree, id: NodeId, request: ValueRequest) -> Result<Outcome> {
    let node = lookup_mut(tree, id)?;
    let handler = node
        .capabilities
        .value
        .as_deref_mut()
        .unwrap_or_else(|| missing_handler(id, Capability::Value));

    Ok(match request {
        ValueRequest::GetCurrentValue => Outcome::value(handler.current()),
        ValueRequest::GetMinimumValue => Outcome::value(handler.minimum()),
        ValueRequest::GetMaximumValue => Outcome::value(handler.maximum()),
        ValueRequest::GetMinimumIncrement => Outcome::value(handler.increment()),
        ValueRequest::SetCurrentValue { value } => {
            Outcome::value(value.is_finite() && handler.set_current(value))
        }
    })
}

// ============================================================================
// Selection
// ============================================================================

fn selection(
    tree: &mut AccessibleTree,
    id: NodeId,
    request: SelectionRequest,
    ctx: &HandlerContext<'_>,
) -> Result<Outcome> {
    let node = lookup_mut(tree, id)?;
    let children = node.children.clone();
    let handler = node
        .capabilities
        .selection
        .as_deref_mut()
        .unwrap_or_else(|| missing_handler(id, Capability::Selection));
    let child = |i: i32| index(i).filter(|i| *i < children.len());

    Ok(match request {
        SelectionRequest::GetNSelectedChildren => Outcome::value(count(handler.selected().len())),
        SelectionRequest::GetSelectedChild { index: i } => {
            let selected = handler.selected();
            let reference = index(i)
                .and_then(|i| selected.get(i))
                .and_then(|position| children.get(*position))
                .map_or_else(ObjectRef::null, |c| ctx.reference(*c));
            Outcome::value(reference)
        }
        SelectionRequest::SelectChild { index: i } => Outcome::effect_if(
            child(i).is_some_and(|i| handler.select(i)),
            TreeEffect::SyncSelection,
        ),
        SelectionRequest::DeselectChild { index: i } => Outcome::effect_if(
            child(i).is_some_and(|i| handler.deselect(i)),
            TreeEffect::SyncSelection,
        ),
        SelectionRequest::IsChildSelected { index: i } => {
            Outcome::value(child(i).is_some_and(|i| handler.selected().contains(&i)))
        }
        SelectionRequest::ClearSelection => {
            Outcome::effect_if(handler.clear(), TreeEffect::SyncSelection)
        }
    })
}

// ============================================================================
// Component
// ============================================================================

fn component(tree: &mut AccessibleTree, id: NodeId, request: ComponentRequest) -> Result<Outcome> {
    let node = lookup_mut(tree, id)?;
    let bounds = node.bounds;
    let handler = node
        .capabilities
        .component
        .as_deref_mut()
        .unwrap_or_else(|| missing_handler(id, Capability::Component));

    Ok(match request {
        ComponentRequest::GetExtents => Outcome::value(bounds.unwrap_or_default()),
        ComponentRequest::Contains { x, y } => {
            Outcome::value(bounds.is_some_and(|b| b.contains(x, y)))
        }
        ComponentRequest::GrabFocus => Outcome::effect_if(handler.grab_focus(), TreeEffect::Focus),
    })
}

// ============================================================================
// Collection
// ============================================================================

fn collection(
    tree: &AccessibleTree,
    id: NodeId,
    request: &CollectionRequest,
    ctx: &HandlerContext<'_>,
) -> Result<WireValue> {
    let CollectionRequest::GetMatches { rule } = request;
    let node = lookup(tree, id)?;
    let handler = node
        .capabilities()
        .collection()
        .unwrap_or_else(|| missing_handler(id, Capability::Collection));
    let max_depth = handler.max_depth();
    let limit = if rule.count == 0 {
        usize::MAX
    } else {
        rule.count as usize
    };

    // Pre-order walk of descendants
    let mut matches = Vec::new();
    let mut stack: Vec<(NodeId, usize)> = node.children().iter().rev().map(|c| (*c, 1)).collect();
    while let Some((next, depth)) = stack.pop() {
        if matches.len() >= limit {
            break;
        }
        let Some(candidate) = tree.node(next) else {
            continue;
        };
        if handler.accepts(candidate)
            && rule_matches(rule, candidate)
            && let Some(reference) = ctx.registered_reference(next)
        {
            matches.push(reference);
        }
        if max_depth.is_none_or(|max| depth < max) {
            stack.extend(candidate.children().iter().rev().map(|c| (*c, depth + 1)));
        }
    }
    Ok(matches.into_wire())
}

/// Applies a match type to `hits` out of `listed` criteria.
fn compare(match_type: MatchType, listed: usize, hits: usize) -> bool {
    match match_type {
        MatchType::All => hits == listed,
        MatchType::Any => listed == 0 || hits > 0,
        MatchType::None => hits == 0,
    }
}

/// Returns `true` if `node` satisfies every criterion of `rule`.
pub(crate) fn rule_matches(rule: &MatchRule, node: &AccessibleNode) -> bool {
    let states = node.states();
    let listed_states = rule.states.iter().count();
    let state_hits = rule.states.iter().filter(|f| states.contains(*f)).count();

    let role_hits = rule.roles.iter().filter(|r| **r == node.role()).count();

    let attribute_hits = rule
        .attributes
        .iter()
        .filter(|(k, v)| node.attributes().get(*k) == Some(*v))
        .count();

    let interfaces = node.capabilities().set().interfaces();
    let interface_hits = rule
        .interfaces
        .iter()
        .filter(|i| interfaces.contains(*i))
        .count();

    compare(rule.states_match, listed_states, state_hits)
        && compare(rule.roles_match, rule.roles.len(), role_hits)
        && compare(rule.attributes_match, rule.attributes.len(), attribute_hits)
        && compare(rule.interfaces_match, rule.interfaces.len(), interface_hits)
}

// ============================================================================
// Tests
// ============================================================================
