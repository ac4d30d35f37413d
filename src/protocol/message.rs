//! Bus frames.
//!
//! Every frame is a JSON envelope carrying the protocol version and one
//! [`Message`]:
//!
//! ```json
//! {
//!   "version": 1,
//!   "message": {
//!     "kind": "call",
//!     "serial": "uuid",
//!     "sender": ":1.4",
//!     "destination": "org.example.App",
//!     "path": "/org/a11y/bridge/accessible/0",
//!     "interface": "org.a11y.atspi.Action",
//!     "member": "DoAction",
//!     "args": [{ "type": "i32", "value": 0 }]
//!   }
//! }
//! ```
//!
//! | Kind | Direction | Purpose |
//! |------|-----------|---------|
//! | `hello` | peer → bus | Join, optionally claiming a well-known name |
//! | `welcome` | bus → peer | Name granted, unique name assigned |
//! | `name_error` | bus → peer | Name refused |
//! | `publish` / `withdraw` | bridge → bus | Expose or retire a path |
//! | `call` | either | Method call |
//! | `reply` | either | Method reply |
//! | `signal` | bridge → bus → all | Event broadcast |
//! | `peer_gone` | bus → peer | A peer disconnected |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::{BusName, CallSerial, ObjectPath};

use super::value::{Args, WireValue};

// ============================================================================
// Constants
// ============================================================================

/// Version carried by every frame.
///
/// Bumped whenever the value schema or frame layout changes.
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// MethodCall
// ============================================================================

/// A method call addressed to an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Correlates the reply.
    pub serial: CallSerial,

    /// Caller, filled in by the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<BusName>,

    /// Target peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<BusName>,

    /// Target object.
    pub path: ObjectPath,

    /// Interface name.
    pub interface: String,

    /// Member name.
    pub member: String,

    /// Arguments.
    #[serde(default)]
    pub args: Args,
}

impl MethodCall {
    /// Creates a call with a fresh serial.
    #[must_use]
    pub fn new(
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Args,
    ) -> Self {
        Self {
            serial: CallSerial::generate(),
            sender: None,
            destination: None,
            path,
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }

    /// Sets the destination peer.
    #[must_use]
    pub fn to(mut self, destination: BusName) -> Self {
        self.destination = Some(destination);
        self
    }
}

// ============================================================================
// MethodReply
// ============================================================================

/// Result carried by a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBody {
    /// Successful return value.
    Ok(WireValue),
    /// Structured error.
    Error {
        /// Wire error name.
        name: String,
        /// Machine-readable detail.
        detail: String,
    },
}

/// Reply to a [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReply {
    /// Serial of the call being answered.
    pub serial: CallSerial,

    /// Caller to deliver to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<BusName>,

    /// Return value or error.
    pub body: ReplyBody,
}

impl MethodReply {
    /// Creates a success reply.
    #[must_use]
    pub fn success(serial: CallSerial, destination: Option<BusName>, value: WireValue) -> Self {
        Self {
            serial,
            destination,
            body: ReplyBody::Ok(value),
        }
    }

    /// Creates an error reply.
    #[must_use]
    pub fn failure(serial: CallSerial, destination: Option<BusName>, error: &Error) -> Self {
        Self {
            serial,
            destination,
            body: ReplyBody::Error {
                name: error.wire_name().to_string(),
                detail: error.wire_detail(),
            },
        }
    }

    /// Creates a reply from a call result.
    #[must_use]
    pub fn from_result(
        serial: CallSerial,
        destination: Option<BusName>,
        result: Result<WireValue>,
    ) -> Self {
        match result {
            Ok(value) => Self::success(serial, destination, value),
            Err(e) => Self::failure(serial, destination, &e),
        }
    }

    /// Returns `true` for a success reply.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.body, ReplyBody::Ok(_))
    }

    /// Extracts the return value.
    ///
    /// # Errors
    ///
    /// Returns the error named by the reply, rebuilt with
    /// [`Error::from_wire`].
    pub fn into_result(self) -> Result<WireValue> {
        match self.body {
            ReplyBody::Ok(value) => Ok(value),
            ReplyBody::Error { name, detail } => Err(Error::from_wire(&name, &detail)),
        }
    }
}

// ============================================================================
// Signal
// ============================================================================

/// A broadcast event from an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Emitting peer, filled in by the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<BusName>,

    /// Emitting object.
    pub path: ObjectPath,

    /// Event interface.
    pub interface: String,

    /// Event member.
    pub member: String,

    /// Event detail (`add`, `remove`, a state name, ...).
    #[serde(default)]
    pub detail: String,

    /// Event payload.
    #[serde(default)]
    pub args: Args,
}

impl Signal {
    /// Creates a signal.
    #[must_use]
    pub fn new(
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
        detail: impl Into<String>,
        args: Args,
    ) -> Self {
        Self {
            sender: None,
            path,
            interface: interface.into(),
            member: member.into(),
            detail: detail.into(),
            args,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// One bus frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Join the bus, optionally claiming a well-known name.
    Hello {
        /// Requested well-known name. Clients without one only get a
        /// unique name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<BusName>,
    },

    /// Name granted.
    Welcome {
        /// Unique name assigned to the connection.
        unique_name: BusName,
    },

    /// Name refused.
    NameError {
        /// Requested name.
        name: String,
        /// Reason given by the bus.
        reason: String,
    },

    /// Expose an object path.
    Publish {
        /// Object path.
        path: ObjectPath,
        /// Interfaces implemented at the path.
        interfaces: Vec<String>,
    },

    /// Retire an object path.
    Withdraw {
        /// Object path.
        path: ObjectPath,
    },

    /// Method call.
    Call(MethodCall),

    /// Method reply.
    Reply(MethodReply),

    /// Broadcast event.
    Signal(Signal),

    /// A peer disconnected; its calls will never read a reply.
    PeerGone {
        /// The vanished peer.
        name: BusName,
    },
}

impl Message {
    /// Returns the frame kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Welcome { .. } => "welcome",
            Self::NameError { .. } => "name_error",
            Self::Publish { .. } => "publish",
            Self::Withdraw { .. } => "withdraw",
            Self::Call(_) => "call",
            Self::Reply(_) => "reply",
            Self::Signal(_) => "signal",
            Self::PeerGone { .. } => "peer_gone",
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    message: &'a Message,
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    message: serde_json::Value,
}

/// Fields of a call frame that could not be decoded in full.
///
/// Enough to send a decode-error reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokenCall {
    /// Serial of the call.
    pub serial: CallSerial,
    /// Caller, if present.
    pub sender: Option<BusName>,
}

/// Encodes a frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    let envelope = Envelope {
        version: PROTOCOL_VERSION,
        message,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes a frame.
///
/// # Errors
///
/// - [`Error::Json`] if the bytes are not a frame
/// - [`Error::Protocol`] if the frame has another protocol version
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    if raw.version != PROTOCOL_VERSION {
        return Err(Error::protocol(format!(
            "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
            raw.version
        )));
    }
    Ok(serde_json::from_value(raw.message)?)
}

/// Recovers the serial and sender of a call frame that failed to decode.
///
/// Returns `None` if the frame is not a recognisable call.
#[must_use]
pub fn salvage_call(bytes: &[u8]) -> Option<BrokenCall> {
    let raw: RawEnvelope = serde_json::from_slice(bytes).ok()?;
    let message = raw.message.as_object()?;
    if message.get("kind")?.as_str()? != "call" {
        return None;
    }
    let serial = serde_json::from_value(message.get("serial")?.clone()).ok()?;
    let sender = message
        .get("sender")
        .and_then(|s| serde_json::from_value(s.clone()).ok());
    Some(BrokenCall { serial, sender })
}

// ============================================================================
// Tests
// ============================================================================
