//! Typed method requests, organized by interface.
//!
//! Inbound calls arrive as `(interface, member, args)`. They are parsed here,
//! on the dispatch side, before anything is queued to the owner thread, so
//! bad arguments and unknown members never cost an owner-thread round trip.
//!
//! # Interfaces
//!
//! | Interface | Request enum |
//! |-----------|--------------|
//! | `org.a11y.atspi.Accessible` | [`AccessibleRequest`] |
//! | `org.a11y.atspi.Action` | [`ActionRequest`] |
//! | `org.a11y.atspi.Text` | [`TextRequest`] |
//! | `org.a11y.atspi.Value` | [`ValueRequest`] |
//! | `org.a11y.atspi.Selection` | [`SelectionRequest`] |
//! | `org.a11y.atspi.Component` | [`ComponentRequest`] |
//! | `org.a11y.atspi.Collection` | [`CollectionRequest`] |
//!
//! Indices and offsets are `i32` on the wire.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::protocol::{Args, MatchRule, interfaces};
use crate::tree::Capability;

// ============================================================================
// MethodRequest
// ============================================================================

/// A parsed inbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodRequest {
    /// Accessible interface.
    Accessible(AccessibleRequest),
    /// Action interface.
    Action(ActionRequest),
    /// Text interface.
    Text(TextRequest),
    /// Value interface.
    Value(ValueRequest),
    /// Selection interface.
    Selection(SelectionRequest),
    /// Component interface.
    Component(ComponentRequest),
    /// Collection interface.
    Collection(CollectionRequest),
}

impl MethodRequest {
    /// Parses a call.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] for an unknown interface or member
    /// - [`Error::Decode`] if an argument is missing or has the wrong shape
    pub fn parse(interface: &str, member: &str, args: &Args) -> Result<Self> {
        let request = match interface {
            interfaces::ACCESSIBLE => Self::Accessible(AccessibleRequest::parse(member, args)?),
            interfaces::ACTION => Self::Action(ActionRequest::parse(member, args)?),
            interfaces::TEXT => Self::Text(TextRequest::parse(member, args)?),
            interfaces::VALUE => Self::Value(ValueRequest::parse(member, args)?),
            interfaces::SELECTION => Self::Selection(SelectionRequest::parse(member, args)?),
            interfaces::COMPONENT => Self::Component(ComponentRequest::parse(member, args)?),
            interfaces::COLLECTION => Self::Collection(CollectionRequest::parse(member, args)?),
            other => return Err(Error::unsupported(format!("interface {other}"))),
        };
        Ok(request)
    }

    /// Returns the capability the request needs, `None` for Accessible.
    #[must_use]
    pub const fn capability(&self) -> Option<Capability> {
        match self {
            Self::Accessible(_) => None,
            Self::Action(_) => Some(Capability::Action),
            Self::Text(_) => Some(Capability::Text),
            Self::Value(_) => Some(Capability::Value),
            Self::Selection(_) => Some(Capability::Selection),
            Self::Component(_) => Some(Capability::Component),
            Self::Collection(_) => Some(Capability::Collection),
        }
    }
}

fn unknown_member(interface: &str, member: &str) -> Error {
    Error::unsupported(format!("{interface}.{member}"))
}

// ============================================================================
// Accessible Requests
// ============================================================================

/// Accessible interface requests. Every node supports these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessibleRequest {
    /// Role code.
    GetRole,
    /// Role name.
    GetRoleName,
    /// Accessible name.
    GetName,
    /// Accessible description.
    GetDescription,
    /// State set.
    GetState,
    /// Attribute map.
    GetAttributes,
    /// Number of children.
    GetChildCount,
    /// Child reference at a position.
    GetChildAtIndex {
        /// Child position.
        index: i32,
    },
    /// All child references.
    GetChildren,
    /// Parent reference, null for the root.
    GetParent,
    /// Position among siblings, `-1` for the root.
    GetIndexInParent,
    /// Relation set.
    GetRelationSet,
    /// Supported interface names.
    GetInterfaces,
}

impl AccessibleRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetRole" => Self::GetRole,
            "GetRoleName" => Self::GetRoleName,
            "GetName" => Self::GetName,
            "GetDescription" => Self::GetDescription,
            "GetState" => Self::GetState,
            "GetAttributes" => Self::GetAttributes,
            "GetChildCount" => Self::GetChildCount,
            "GetChildAtIndex" => Self::GetChildAtIndex {
                index: args.get(0)?,
            },
            "GetChildren" => Self::GetChildren,
            "GetParent" => Self::GetParent,
            "GetIndexInParent" => Self::GetIndexInParent,
            "GetRelationSet" => Self::GetRelationSet,
            "GetInterfaces" => Self::GetInterfaces,
            other => return Err(unknown_member(interfaces::ACCESSIBLE, other)),
        })
    }
}

// ============================================================================
// Action Requests
// ============================================================================

/// Action interface requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequest {
    /// Number of actions.
    GetNActions,
    /// Action name.
    GetName {
        /// Action index.
        index: i32,
    },
    /// Action description.
    GetDescription {
        /// Action index.
        index: i32,
    },
    /// Action key binding.
    GetKeyBinding {
        /// Action index.
        index: i32,
    },
    /// Invoke an action.
    DoAction {
        /// Action index.
        index: i32,
    },
}

impl ActionRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetNActions" => Self::GetNActions,
            "GetName" => Self::GetName {
                index: args.get(0)?,
            },
            "GetDescription" => Self::GetDescription {
                index: args.get(0)?,
            },
            "GetKeyBinding" => Self::GetKeyBinding {
                index: args.get(0)?,
            },
            "DoAction" => Self::DoAction {
                index: args.get(0)?,
            },
            other => return Err(unknown_member(interfaces::ACTION, other)),
        })
    }
}

// ============================================================================
// Text Requests
// ============================================================================

/// Text interface requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRequest {
    /// Length in characters.
    GetCharacterCount,
    /// Substring by character offsets. `end` of `-1` means the end.
    GetText {
        /// First character.
        start: i32,
        /// One past the last character.
        end: i32,
    },
    /// Caret position.
    GetCaretOffset,
    /// Move the caret.
    SetCaretOffset {
        /// New caret position.
        offset: i32,
    },
}

impl TextRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetCharacterCount" => Self::GetCharacterCount,
            "GetText" => Self::GetText {
                start: args.get(0)?,
                end: args.get(1)?,
            },
            "GetCaretOffset" => Self::GetCaretOffset,
            "SetCaretOffset" => Self::SetCaretOffset {
                offset: args.get(0)?,
            },
            other => return Err(unknown_member(interfaces::TEXT, other)),
        })
    }
}

// ============================================================================
// Value Requests
// ============================================================================

/// Value interface requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRequest {
    /// Current value.
    GetCurrentValue,
    /// Set the current value.
    SetCurrentValue {
        /// Requested value.
        value: f64,
    },
    /// Lower bound.
    GetMinimumValue,
    /// Upper bound.
    GetMaximumValue,
    /// Step size.
    GetMinimumIncrement,
}

impl ValueRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetCurrentValue" => Self::GetCurrentValue,
            "SetCurrentValue" => Self::SetCurrentValue {
                value: args.get(0)?,
            },
            "GetMinimumValue" => Self::GetMinimumValue,
            "GetMaximumValue" => Self::GetMaximumValue,
            "GetMinimumIncrement" => Self::GetMinimumIncrement,
            other => return Err(unknown_member(interfaces::VALUE, other)),
        })
    }
}

// ============================================================================
// Selection Requests
// ============================================================================

/// Selection interface requests. Indices are child positions, except for
/// `GetSelectedChild`, whose index counts selected children only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRequest {
    /// Number of selected children.
    GetNSelectedChildren,
    /// N-th selected child.
    GetSelectedChild {
        /// Index among selected children.
        index: i32,
    },
    /// Select a child.
    SelectChild {
        /// Child position.
        index: i32,
    },
    /// Deselect a child.
    DeselectChild {
        /// Child position.
        index: i32,
    },
    /// Whether a child is selected.
    IsChildSelected {
        /// Child position.
        index: i32,
    },
    /// Deselect everything.
    ClearSelection,
}

impl SelectionRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetNSelectedChildren" => Self::GetNSelectedChildren,
            "GetSelectedChild" => Self::GetSelectedChild {
                index: args.get(0)?,
            },
            "SelectChild" => Self::SelectChild {
                index: args.get(0)?,
            },
            "DeselectChild" => Self::DeselectChild {
                index: args.get(0)?,
            },
            "IsChildSelected" => Self::IsChildSelected {
                index: args.get(0)?,
            },
            "ClearSelection" => Self::ClearSelection,
            other => return Err(unknown_member(interfaces::SELECTION, other)),
        })
    }
}

// ============================================================================
// Component Requests
// ============================================================================

/// Component interface requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRequest {
    /// Bounding rectangle.
    GetExtents,
    /// Whether a screen point lies inside the bounds.
    Contains {
        /// Screen x.
        x: i32,
        /// Screen y.
        y: i32,
    },
    /// Move keyboard focus here.
    GrabFocus,
}

impl ComponentRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetExtents" => Self::GetExtents,
            "Contains" => Self::Contains {
                x: args.get(0)?,
                y: args.get(1)?,
            },
            "GrabFocus" => Self::GrabFocus,
            other => return Err(unknown_member(interfaces::COMPONENT, other)),
        })
    }
}

// ============================================================================
// Collection Requests
// ============================================================================

/// Collection interface requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRequest {
    /// Descendants matching a rule, in tree order.
    GetMatches {
        /// Query.
        rule: MatchRule,
    },
}

impl CollectionRequest {
    fn parse(member: &str, args: &Args) -> Result<Self> {
        Ok(match member {
            "GetMatches" => Self::GetMatches {
                rule: args.get(0)?,
            },
            other => return Err(unknown_member(interfaces::COLLECTION, other)),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::{DecodeError, Shape};

    #[test]
    fn test_parse_without_args() {
        let request = MethodRequest::parse(interfaces::ACCESSIBLE, "GetRole", &Args::empty())
            .expect("parse");
        assert_eq!(request, MethodRequest::Accessible(AccessibleRequest::GetRole));
        assert_eq!(request.capability(), None);
    }

    #[test]
    fn test_parse_with_args() {
        let args = Args::empty().with(2i32).with(5i32);
        let request = MethodRequest::parse(interfaces::TEXT, "GetText", &args).expect("parse");
        assert_eq!(
            request,
            MethodRequest::Text(TextRequest::GetText { start: 2, end: 5 })
        );
        assert_eq!(request.capability(), Some(Capability::Text));
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let args = Args::empty().with("zero");
        let err = MethodRequest::parse(interfaces::ACTION, "DoAction", &args).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::Mismatch {
                expected: Shape::Int,
                actual: Shape::Str,
            })
        ));
    }

    #[test]
    fn test_missing_arg_is_decode_error() {
        let err = MethodRequest::parse(interfaces::COMPONENT, "Contains", &Args::empty().with(1i32))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::Mismatch {
                expected: Shape::Int,
                actual: Shape::Unit,
            })
        ));
    }

    #[test]
    fn test_unknown_member_is_unsupported() {
        let err = MethodRequest::parse(interfaces::VALUE, "Frobnicate", &Args::empty()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));

        let err = MethodRequest::parse("org.example.Nope", "GetRole", &Args::empty()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn test_collection_rule_arg() {
        let rule = MatchRule {
            count: 3,
            ..MatchRule::default()
        };
        let args = Args::empty().with(rule.clone());
        let request = MethodRequest::parse(interfaces::COLLECTION, "GetMatches", &args)
            .expect("parse");
        assert_eq!(
            request,
            MethodRequest::Collection(CollectionRequest::GetMatches { rule })
        );
    }
}
