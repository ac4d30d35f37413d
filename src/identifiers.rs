//! Type-safe identifiers for bridge entities.
//!
//! Newtype wrappers keep node ids, object paths, bus names, and call
//! serials from being mixed up.
//!
//! | Type | Wraps | Example |
//! |------|-------|---------|
//! | [`NodeId`] | arena index + generation | `7v2` |
//! | [`ObjectPath`] | validated path string | `/org/a11y/bridge/accessible/8589934599` |
//! | [`BusName`] | well-known or unique name | `org.example.App`, `:1.42` |
//! | [`CallSerial`] | UUID v4 | `550e8400-e29b-41d4-a716-446655440000` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Prefix under which every registered node is exposed.
pub const ACCESSIBLE_PATH_PREFIX: &str = "/org/a11y/bridge/accessible";

/// Path used on the wire for "no object".
pub const NULL_PATH: &str = "/org/a11y/atspi/null";

static OBJECT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z0-9_]+(/[A-Za-z0-9_]+)*)?$").expect("object path regex")
});

static WELL_KNOWN_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_-][A-Za-z0-9_-]*(\.[A-Za-z_-][A-Za-z0-9_-]*)+$")
        .expect("well-known name regex")
});

static UNIQUE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)+$").expect("unique name regex"));

/// Longest bus name accepted.
const MAX_NAME_LEN: usize = 255;

// ============================================================================
// NodeId
// ============================================================================

/// Identity of a node in an [`AccessibleTree`](crate::tree::AccessibleTree).
///
/// The arena recycles slots, so the generation distinguishes a new node
/// from a removed one that used the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Creates an id from its arena components.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the arena slot index.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Returns the slot generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the id into a single `u64` (generation in the high half).
    #[inline]
    #[must_use]
    pub const fn as_raw(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks an id produced by [`NodeId::as_raw`].
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// ============================================================================
// ObjectPath
// ============================================================================

/// An object path exposed on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Parses and validates an object path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the string is not a valid path.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if OBJECT_PATH_RE.is_match(&path) {
            Ok(Self(path))
        } else {
            Err(Error::invalid_argument(format!("invalid object path: {path:?}")))
        }
    }

    /// Returns the path a node is exposed under.
    ///
    /// Derived from the full id, so two live nodes never share a path and a
    /// recycled arena slot never reuses a retired path.
    #[must_use]
    pub fn for_node(node: NodeId) -> Self {
        Self(format!("{ACCESSIBLE_PATH_PREFIX}/{}", node.as_raw()))
    }

    /// Returns the null path.
    #[must_use]
    pub fn null() -> Self {
        Self(NULL_PATH.to_string())
    }

    /// Returns `true` for the null path.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == NULL_PATH
    }

    /// Returns the path as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// BusName
// ============================================================================

/// A bus connection name.
///
/// Either a well-known name claimed by the bridge (`org.example.App`) or a
/// unique name assigned by the bus (`:1.42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BusName(String);

impl BusName {
    /// Parses and validates a bus name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is malformed.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = name.len() <= MAX_NAME_LEN
            && (WELL_KNOWN_NAME_RE.is_match(&name) || UNIQUE_NAME_RE.is_match(&name));
        if valid {
            Ok(Self(name))
        } else {
            Err(Error::invalid_argument(format!("invalid bus name: {name:?}")))
        }
    }

    /// Returns `true` if this is a unique (bus-assigned) name.
    #[inline]
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.0.starts_with(':')
    }

    /// Returns the name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BusName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// CallSerial
// ============================================================================

/// Correlates a method call with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallSerial(Uuid);

impl CallSerial {
    /// Generates a fresh random serial.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CallSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_raw_roundtrip() {
        let id = NodeId::new(7, 3);
        assert_eq!(NodeId::from_raw(id.as_raw()), id);
        assert_eq!(id.to_string(), "7v3");
    }

    #[test]
    fn test_recycled_slot_gets_new_path() {
        let old = NodeId::new(4, 0);
        let recycled = NodeId::new(4, 1);
        assert_ne!(ObjectPath::for_node(old), ObjectPath::for_node(recycled));
    }

    #[test]
    fn test_object_path_validation() {
        assert!(ObjectPath::new("/").is_ok());
        assert!(ObjectPath::new("/org/a11y/bridge/accessible/12").is_ok());
        assert!(ObjectPath::new("org/a11y").is_err());
        assert!(ObjectPath::new("/org//a11y").is_err());
        assert!(ObjectPath::new("/org/a11y/").is_err());
        assert!(ObjectPath::new("/org/a-b").is_err());
    }

    #[test]
    fn test_node_path_is_valid() {
        let path = ObjectPath::for_node(NodeId::new(1, 2));
        assert!(ObjectPath::new(path.as_str()).is_ok());
        assert!(!path.is_null());
        assert!(ObjectPath::null().is_null());
    }

    #[test]
    fn test_bus_name_validation() {
        assert!(BusName::new("org.example.App").is_ok());
        assert!(BusName::new(":1.42").is_ok());
        assert!(BusName::new(":1.42").unwrap().is_unique());
        assert!(BusName::new("noperiod").is_err());
        assert!(BusName::new("org..example").is_err());
        assert!(BusName::new("").is_err());
    }

    #[test]
    fn test_bus_name_deserialize_rejects_invalid() {
        let ok: std::result::Result<BusName, _> = serde_json::from_str("\"org.example.App\"");
        assert!(ok.is_ok());
        let bad: std::result::Result<BusName, _> = serde_json::from_str("\"bad\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_call_serial_unique() {
        assert_ne!(CallSerial::generate(), CallSerial::generate());
    }
}
