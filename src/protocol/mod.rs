//! Wire protocol: typed values and bus frames.
//!
//! # Layers
//!
//! | Layer | Type | Encoding |
//! |-------|------|----------|
//! | Value | [`WireValue`] | [`encode`] / [`decode`] |
//! | Frame | [`Message`] | [`encode_message`] / [`decode_message`] |
//!
//! Values are self-describing: each carries its [`Shape`]. Decoding
//! against the wrong shape yields [`DecodeError::Mismatch`], which the
//! dispatcher turns into an error reply.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `interfaces` | Interface and signal names |
//! | `value` | `WireValue`, `Shape`, typed conversions |
//! | `codec` | Value encoding |
//! | `message` | Frames and the versioned envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Interface and member names.
pub mod interfaces;

/// Typed wire values.
pub mod value;

/// Value encoding.
pub mod codec;

/// Bus frames.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{decode, decode_any, encode};
pub use message::{
    BrokenCall, Message, MethodCall, MethodReply, PROTOCOL_VERSION, ReplyBody, Signal,
    decode_message, encode_message, salvage_call,
};
pub use value::{
    Args, DecodeError, FromWire, IntoWire, MatchRule, MatchType, ObjectRef, Shape, WireRelation,
    WireValue,
};
