//! Value encoding.
//!
//! [`encode`] and [`decode`] are pure: they only look at the value or bytes
//! they are given.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

use super::value::{DecodeError, Shape, WireValue};

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a value into wire bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for a non-finite double, which has
/// no lossless wire form.
pub fn encode(value: &WireValue) -> Result<Vec<u8>> {
    if let WireValue::Double(d) = value
        && !d.is_finite()
    {
        return Err(Error::invalid_argument(format!("non-finite double {d}")));
    }
    Ok(serde_json::to_vec(value)?)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes wire bytes, requiring a specific shape.
///
/// # Errors
///
/// - [`DecodeError::Malformed`] if the bytes are not a value
/// - [`DecodeError::Mismatch`] if the value has another shape
pub fn decode(bytes: &[u8], expected: Shape) -> std::result::Result<WireValue, DecodeError> {
    let value = decode_any(bytes)?;
    let actual = value.shape();
    if actual == expected {
        Ok(value)
    } else {
        Err(DecodeError::Mismatch { expected, actual })
    }
}

/// Decodes wire bytes of any shape.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the bytes are not a value.
pub fn decode_any(bytes: &[u8]) -> std::result::Result<WireValue, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::identifiers::{NodeId, ObjectPath};
    use crate::protocol::value::{MatchRule, MatchType, ObjectRef, WireRelation};
    use crate::tree::{Attributes, Rect, RelationType, Role, StateSet};

    fn object_ref() -> impl Strategy<Value = ObjectRef> {
        (any::<u32>(), any::<u32>(), 1u32..1000).prop_map(|(index, generation, peer)| {
            ObjectRef::new(
                format!(":1.{peer}"),
                ObjectPath::for_node(NodeId::new(index, generation)),
            )
        })
    }

    fn attributes() -> impl Strategy<Value = Attributes> {
        prop::collection::btree_map("[a-z-]{1,8}", ".{0,12}", 0..4)
    }

    fn scalar_value() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            any::<bool>().prop_map(WireValue::Bool),
            any::<i32>().prop_map(WireValue::Int),
            any::<u32>().prop_map(WireValue::UInt),
            any::<i64>().prop_map(WireValue::Int64),
            any::<u64>().prop_map(WireValue::UInt64),
            any::<f64>()
                .prop_filter("finite", |d| d.is_finite())
                .prop_map(WireValue::Double),
            ".{0,24}".prop_map(WireValue::Str),
            any::<u64>().prop_map(|bits| WireValue::States(StateSet::from_bits(bits))),
            any::<u32>().prop_map(|code| WireValue::Role(Role::custom(code))),
        ]
    }

    fn composite_value() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            prop::collection::vec(".{0,8}", 0..4).prop_map(WireValue::Strings),
            (any::<i32>(), any::<i32>(), any::<i32>(), any::<i32>())
                .prop_map(|(x, y, w, h)| WireValue::Rect(Rect::new(x, y, w, h))),
            object_ref().prop_map(WireValue::Ref),
            prop::collection::vec(object_ref(), 0..4).prop_map(WireValue::Refs),
            prop::collection::vec((any::<u32>(), prop::collection::vec(object_ref(), 0..3)), 0..3)
                .prop_map(|entries| WireValue::Relations(
                    entries
                        .into_iter()
                        .map(|(code, targets)| WireRelation {
                            kind: RelationType::from_code(code),
                            targets,
                        })
                        .collect()
                )),
            attributes().prop_map(WireValue::Attributes),
            (any::<u64>(), attributes(), 0u32..10).prop_map(|(bits, attrs, count)| {
                WireValue::Rule(MatchRule {
                    states: StateSet::from_bits(bits),
                    states_match: MatchType::Any,
                    roles: vec![Role::Button, Role::custom(2000)],
                    attributes: attrs,
                    attributes_match: MatchType::None,
                    count,
                    ..MatchRule::default()
                })
            }),
            Just(WireValue::Unit),
        ]
    }

    fn wire_value() -> impl Strategy<Value = WireValue> {
        prop_oneof![scalar_value(), composite_value()]
    }

    proptest! {
        #[test]
        fn test_roundtrip_is_lossless(value in wire_value()) {
            let bytes = encode(&value).expect("encode");
            let decoded = decode(&bytes, value.shape()).expect("decode");
            prop_assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_decode_wrong_shape() {
        let bytes = encode(&WireValue::Rect(Rect::new(1, 2, 3, 4))).expect("encode");
        assert_eq!(
            decode(&bytes, Shape::States),
            Err(DecodeError::Mismatch {
                expected: Shape::States,
                actual: Shape::Rect
            })
        );
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            decode(b"not json", Shape::Int),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            decode(br#"{"type":"i32","value":"seven"}"#, Shape::Int),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_out_of_range_integer() {
        let bytes = br#"{"type":"i32","value":4294967295}"#;
        assert!(matches!(decode(bytes, Shape::Int), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_encode_rejects_nan() {
        assert!(encode(&WireValue::Double(f64::NAN)).is_err());
        assert!(encode(&WireValue::Double(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_custom_codes_survive() {
        for code in [5, 37, 38, Role::CUSTOM_BASE, u32::MAX] {
            let value = WireValue::Role(Role::custom(code));
            let bytes = encode(&value).expect("encode");
            assert_eq!(decode(&bytes, Shape::Role), Ok(value));
        }

        let value = WireValue::Relations(vec![WireRelation {
            kind: RelationType::from_code(1),
            targets: Vec::new(),
        }]);
        let bytes = encode(&value).expect("encode");
        assert_eq!(decode(&bytes, Shape::Relations), Ok(value));
    }

    #[test]
    fn test_state_bits_survive() {
        let states = StateSet::from_bits(u64::MAX);
        let bytes = encode(&WireValue::States(states)).expect("encode");
        assert_eq!(decode(&bytes, Shape::States), Ok(WireValue::States(states)));
    }
}
