//! Typed wire values.
//!
//! Every argument and return value on the bus is a [`WireValue`]. The
//! [`Shape`] of a value is its type tag; decoding against an expected shape
//! fails with [`DecodeError::Mismatch`] instead of guessing.
//!
//! # Schema
//!
//! Values are JSON objects tagged by shape:
//!
//! ```json
//! { "type": "rect", "value": { "x": 0, "y": 0, "width": 80, "height": 24 } }
//! { "type": "ref", "value": { "name": ":1.7", "path": "/org/a11y/bridge/accessible/3" } }
//! { "type": "unit" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::ObjectPath;
use crate::tree::{Attributes, Rect, RelationType, Role, StateSet};

// ============================================================================
// Shape
// ============================================================================

macro_rules! shapes {
    ($( $variant:ident => $name:literal, )*) => {
        /// Type tag of a [`WireValue`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Shape {
            $( #[doc = concat!("`", $name, "`")] $variant, )*
        }

        impl Shape {
            /// Returns the tag used on the wire.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                }
            }

            /// Parses a wire tag.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

shapes! {
    Bool => "bool",
    Int => "i32",
    UInt => "u32",
    Int64 => "i64",
    UInt64 => "u64",
    Double => "f64",
    Str => "str",
    Strings => "strings",
    Rect => "rect",
    States => "states",
    Role => "role",
    Ref => "ref",
    Refs => "refs",
    Relations => "relations",
    Attributes => "attributes",
    Rule => "rule",
    Unit => "unit",
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// DecodeError
// ============================================================================

/// A value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The value has a different shape than required.
    #[error("expected {expected}, found {actual}")]
    Mismatch {
        /// Required shape.
        expected: Shape,
        /// Shape actually present (`unit` for a missing argument).
        actual: Shape,
    },

    /// The bytes are not a value at all.
    #[error("malformed value: {message}")]
    Malformed {
        /// Parser message.
        message: String,
    },
}

impl DecodeError {
    /// Creates a malformed-value error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

// ============================================================================
// ObjectRef
// ============================================================================

/// Reference to an object, possibly owned by another bus peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bus name of the owning peer. Empty for the null reference.
    pub name: String,
    /// Object path on that peer.
    pub path: ObjectPath,
}

impl ObjectRef {
    /// Creates a reference.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, path: ObjectPath) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    /// The reference meaning "no object".
    #[must_use]
    pub fn null() -> Self {
        Self {
            name: String::new(),
            path: ObjectPath::null(),
        }
    }

    /// Returns `true` for the null reference.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.path.is_null()
    }
}

// ============================================================================
// WireRelation
// ============================================================================

/// One entry of a relation set: a relation tag and its targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRelation {
    /// Relation tag (numeric code).
    pub kind: RelationType,
    /// Target objects.
    pub targets: Vec<ObjectRef>,
}

// ============================================================================
// MatchRule
// ============================================================================

/// How a criterion list is compared against a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Node has every listed item.
    #[default]
    All,
    /// Node has at least one listed item.
    Any,
    /// Node has none of the listed items.
    None,
}

/// A Collection query.
///
/// Empty criteria match everything. `count` of `0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchRule {
    /// States to compare.
    #[serde(default)]
    pub states: StateSet,
    /// Comparison for `states`.
    #[serde(default)]
    pub states_match: MatchType,
    /// Roles to compare.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Comparison for `roles`.
    #[serde(default)]
    pub roles_match: MatchType,
    /// Attribute key/value pairs to compare.
    #[serde(default)]
    pub attributes: Attributes,
    /// Comparison for `attributes`.
    #[serde(default)]
    pub attributes_match: MatchType,
    /// Interface names to compare.
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Comparison for `interfaces`.
    #[serde(default)]
    pub interfaces_match: MatchType,
    /// Maximum number of results.
    #[serde(default)]
    pub count: u32,
}

// ============================================================================
// WireValue
// ============================================================================

/// A typed value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WireValue {
    /// Boolean.
    #[serde(rename = "bool")]
    Bool(bool),
    /// Signed 32-bit integer.
    #[serde(rename = "i32")]
    Int(i32),
    /// Unsigned 32-bit integer.
    #[serde(rename = "u32")]
    UInt(u32),
    /// Signed 64-bit integer.
    #[serde(rename = "i64")]
    Int64(i64),
    /// Unsigned 64-bit integer.
    #[serde(rename = "u64")]
    UInt64(u64),
    /// Finite double.
    #[serde(rename = "f64")]
    Double(f64),
    /// UTF-8 string.
    #[serde(rename = "str")]
    Str(String),
    /// List of strings.
    #[serde(rename = "strings")]
    Strings(Vec<String>),
    /// Rectangle.
    #[serde(rename = "rect")]
    Rect(Rect),
    /// State bitmask.
    #[serde(rename = "states")]
    States(StateSet),
    /// Role code.
    #[serde(rename = "role")]
    Role(Role),
    /// Object reference.
    #[serde(rename = "ref")]
    Ref(ObjectRef),
    /// List of object references.
    #[serde(rename = "refs")]
    Refs(Vec<ObjectRef>),
    /// Relation set.
    #[serde(rename = "relations")]
    Relations(Vec<WireRelation>),
    /// Attribute map.
    #[serde(rename = "attributes")]
    Attributes(Attributes),
    /// Collection query.
    #[serde(rename = "rule")]
    Rule(MatchRule),
    /// No value.
    #[serde(rename = "unit")]
    Unit,
}

impl WireValue {
    /// Returns the shape of this value.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        match self {
            Self::Bool(_) => Shape::Bool,
            Self::Int(_) => Shape::Int,
            Self::UInt(_) => Shape::UInt,
            Self::Int64(_) => Shape::Int64,
            Self::UInt64(_) => Shape::UInt64,
            Self::Double(_) => Shape::Double,
            Self::Str(_) => Shape::Str,
            Self::Strings(_) => Shape::Strings,
            Self::Rect(_) => Shape::Rect,
            Self::States(_) => Shape::States,
            Self::Role(_) => Shape::Role,
            Self::Ref(_) => Shape::Ref,
            Self::Refs(_) => Shape::Refs,
            Self::Relations(_) => Shape::Relations,
            Self::Attributes(_) => Shape::Attributes,
            Self::Rule(_) => Shape::Rule,
            Self::Unit => Shape::Unit,
        }
    }
}

// ============================================================================
// FromWire / IntoWire
// ============================================================================

/// Conversion from a Rust value into a [`WireValue`].
pub trait IntoWire {
    /// Wraps the value.
    fn into_wire(self) -> WireValue;
}

/// Conversion from a [`WireValue`] into a Rust value.
pub trait FromWire: Sized {
    /// Shape this type decodes from.
    const SHAPE: Shape;

    /// Unwraps the value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Mismatch`] if the shape differs.
    fn from_wire(value: WireValue) -> Result<Self, DecodeError>;
}

macro_rules! wire_conversions {
    ($( $ty:ty => $variant:ident, )*) => {
        $(
            impl IntoWire for $ty {
                #[inline]
                fn into_wire(self) -> WireValue {
                    WireValue::$variant(self)
                }
            }

            impl FromWire for $ty {
                const SHAPE: Shape = Shape::$variant;

                fn from_wire(value: WireValue) -> Result<Self, DecodeError> {
                    match value {
                        WireValue::$variant(inner) => Ok(inner),
                        other => Err(DecodeError::Mismatch {
                            expected: Self::SHAPE,
                            actual: other.shape(),
                        }),
                    }
                }
            }
        )*
    };
}

wire_conversions! {
    bool => Bool,
    i32 => Int,
    u32 => UInt,
    i64 => Int64,
    u64 => UInt64,
    f64 => Double,
    String => Str,
    Vec<String> => Strings,
    Rect => Rect,
    StateSet => States,
    Role => Role,
    ObjectRef => Ref,
    Vec<ObjectRef> => Refs,
    Vec<WireRelation> => Relations,
    Attributes => Attributes,
    MatchRule => Rule,
}

impl IntoWire for () {
    #[inline]
    fn into_wire(self) -> WireValue {
        WireValue::Unit
    }
}

impl FromWire for () {
    const SHAPE: Shape = Shape::Unit;

    fn from_wire(value: WireValue) -> Result<Self, DecodeError> {
        match value {
            WireValue::Unit => Ok(()),
            other => Err(DecodeError::Mismatch {
                expected: Shape::Unit,
                actual: other.shape(),
            }),
        }
    }
}

impl IntoWire for &str {
    #[inline]
    fn into_wire(self) -> WireValue {
        WireValue::Str(self.to_string())
    }
}

impl IntoWire for WireValue {
    #[inline]
    fn into_wire(self) -> WireValue {
        self
    }
}

// ============================================================================
// Args
// ============================================================================

/// Positional arguments of a call or signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(Vec<WireValue>);

impl Args {
    /// Wraps a list of values.
    #[inline]
    #[must_use]
    pub fn new(values: Vec<WireValue>) -> Self {
        Self(values)
    }

    /// No arguments.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Appends a value.
    #[inline]
    #[must_use]
    pub fn with(mut self, value: impl IntoWire) -> Self {
        self.0.push(value.into_wire());
        self
    }

    /// Returns the number of arguments.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no arguments.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw values.
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[WireValue] {
        &self.0
    }

    /// Decodes the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Mismatch`] if the argument has another shape
    /// or is missing (reported as `unit`).
    pub fn get<T: FromWire>(&self, index: usize) -> Result<T, DecodeError> {
        match self.0.get(index) {
            Some(value) => T::from_wire(value.clone()),
            None => Err(DecodeError::Mismatch {
                expected: T::SHAPE,
                actual: Shape::Unit,
            }),
        }
    }
}

impl From<Vec<WireValue>> for Args {
    fn from(values: Vec<WireValue>) -> Self {
        Self(values)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::NodeId;

    #[test]
    fn test_shape_names_roundtrip() {
        for shape in [Shape::Bool, Shape::Int, Shape::Refs, Shape::Rule, Shape::Unit] {
            assert_eq!(Shape::from_name(shape.name()), Some(shape));
        }
        assert_eq!(Shape::from_name("tuple"), None);
    }

    #[test]
    fn test_from_wire_mismatch() {
        let err = i32::from_wire(WireValue::Str("x".into())).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Mismatch {
                expected: Shape::Int,
                actual: Shape::Str
            }
        );
    }

    #[test]
    fn test_args_get() {
        let args = Args::empty().with(3i32).with("name");
        assert_eq!(args.get::<i32>(0), Ok(3));
        assert_eq!(args.get::<String>(1).as_deref(), Ok("name"));
        assert!(matches!(
            args.get::<u32>(0),
            Err(DecodeError::Mismatch { expected: Shape::UInt, actual: Shape::Int })
        ));
    }

    #[test]
    fn test_args_missing_is_unit() {
        let args = Args::empty();
        assert_eq!(
            args.get::<i32>(0),
            Err(DecodeError::Mismatch {
                expected: Shape::Int,
                actual: Shape::Unit
            })
        );
    }

    #[test]
    fn test_object_ref_null() {
        assert!(ObjectRef::null().is_null());
        let live = ObjectRef::new(":1.2", ObjectPath::for_node(NodeId::new(0, 0)));
        assert!(!live.is_null());
    }

    #[test]
    fn test_match_rule_defaults() {
        let rule: MatchRule = serde_json::from_str("{}").expect("empty rule");
        assert_eq!(rule, MatchRule::default());
        assert_eq!(rule.states_match, MatchType::All);
    }
}
