//! Error types for the accessibility bus bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use a11y_bus_bridge::{Error, Result};
//!
//! fn lookup(bridge: &Bridge, path: &ObjectPath) -> Result<NodeId> {
//!     bridge.registry().resolve(path)
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Call | [`Error::NotFound`], [`Error::Unsupported`], [`Error::Decode`], [`Error::Timeout`] |
//! | Connection | [`Error::Disconnected`], [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::NameRejected`] |
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Protocol | [`Error::Protocol`], [`Error::Remote`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! # Wire Names
//!
//! Call errors travel to remote clients as structured error replies. The
//! error name is stable:
//!
//! | Variant | Wire name |
//! |---------|-----------|
//! | `NotFound` | `org.a11y.Bridge.Error.NotFound` |
//! | `Unsupported` | `org.a11y.Bridge.Error.Unsupported` |
//! | `Decode` | `org.a11y.Bridge.Error.DecodeError` |
//! | `Timeout` | `org.a11y.Bridge.Error.Timeout` |
//! | `Disconnected` | `org.a11y.Bridge.Error.Disconnected` |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::protocol::{DecodeError, Shape};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Wire Names
// ============================================================================

const WIRE_NOT_FOUND: &str = "org.a11y.Bridge.Error.NotFound";
const WIRE_UNSUPPORTED: &str = "org.a11y.Bridge.Error.Unsupported";
const WIRE_DECODE: &str = "org.a11y.Bridge.Error.DecodeError";
const WIRE_TIMEOUT: &str = "org.a11y.Bridge.Error.Timeout";
const WIRE_DISCONNECTED: &str = "org.a11y.Bridge.Error.Disconnected";
const WIRE_FAILED: &str = "org.a11y.Bridge.Error.Failed";

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Call Errors
    // ========================================================================
    /// Object path or node no longer exists.
    ///
    /// Returned when a path does not resolve, or resolves to a node that was
    /// unregistered before the call ran.
    #[error("Object not found: {target}")]
    NotFound {
        /// The path or node that failed to resolve.
        target: String,
    },

    /// Interface or method not implemented by the target node.
    #[error("Unsupported: {what}")]
    Unsupported {
        /// Interface (and member, if known) that was requested.
        what: String,
    },

    /// Malformed call arguments or frame.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Operation timeout.
    ///
    /// Returned when the owner thread does not answer a call in time.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Bus unavailable.
    ///
    /// Process-wide and transient: the connection manager reconnects on
    /// its own, callers retry at the protocol level.
    #[error("Disconnected from bus")]
    Disconnected,

    /// Bus connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Handshake with the bus did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The bus refused the requested well-known name.
    #[error("Bus name {name} rejected: {reason}")]
    NameRejected {
        /// The requested name.
        name: String,
        /// Reason given by the bus.
        reason: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to a bridge API.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error reply with a name this crate does not model.
    #[error("Remote error {name}: {message}")]
    Remote {
        /// Wire error name.
        name: String,
        /// Error message.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a not found error.
    #[inline]
    pub fn not_found(target: impl ToString) -> Self {
        Self::NotFound {
            target: target.to_string(),
        }
    }

    /// Creates an unsupported error.
    #[inline]
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a name rejected error.
    #[inline]
    pub fn name_rejected(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NameRejected {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Wire Mapping
// ============================================================================

impl Error {
    /// Returns the error name used in error replies.
    #[must_use]
    pub fn wire_name(&self) -> &str {
        match self {
            Self::NotFound { .. } => WIRE_NOT_FOUND,
            Self::Unsupported { .. } => WIRE_UNSUPPORTED,
            Self::Decode(_) => WIRE_DECODE,
            Self::Timeout { .. } => WIRE_TIMEOUT,
            Self::Disconnected => WIRE_DISCONNECTED,
            Self::Remote { name, .. } => name,
            _ => WIRE_FAILED,
        }
    }

    /// Returns the machine-readable detail sent alongside the wire name.
    ///
    /// [`Error::from_wire`] rebuilds the variant from the name and detail.
    #[must_use]
    pub fn wire_detail(&self) -> String {
        match self {
            Self::NotFound { target } => target.clone(),
            Self::Unsupported { what } => what.clone(),
            Self::Decode(DecodeError::Mismatch { expected, actual }) => {
                format!("{}:{}", expected.name(), actual.name())
            }
            Self::Decode(DecodeError::Malformed { message }) => message.clone(),
            Self::Timeout { timeout_ms, .. } => timeout_ms.to_string(),
            Self::Disconnected => String::new(),
            Self::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuilds an error from an error reply.
    #[must_use]
    pub fn from_wire(name: &str, detail: &str) -> Self {
        match name {
            WIRE_NOT_FOUND => Self::not_found(detail),
            WIRE_UNSUPPORTED => Self::unsupported(detail),
            WIRE_DECODE => {
                let parsed = detail.split_once(':').and_then(|(expected, actual)| {
                    Some(DecodeError::Mismatch {
                        expected: Shape::from_name(expected)?,
                        actual: Shape::from_name(actual)?,
                    })
                });
                Self::Decode(parsed.unwrap_or_else(|| DecodeError::malformed(detail)))
            }
            WIRE_TIMEOUT => Self::timeout("remote call", detail.parse().unwrap_or_default()),
            WIRE_DISCONNECTED => Self::Disconnected,
            _ => Self::Remote {
                name: name.to_string(),
                message: detail.to_string(),
            },
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` for errors scoped to a single call.
    ///
    /// These are answered with an error reply and never affect the bridge.
    #[inline]
    #[must_use]
    pub fn is_call_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Unsupported { .. } | Self::Decode(_) | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NameRejected { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::Timeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("/org/a11y/bridge/accessible/4");
        assert_eq!(
            err.to_string(),
            "Object not found: /org/a11y/bridge/accessible/4"
        );
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing identity");
        assert_eq!(err.to_string(), "Configuration error: missing identity");
    }

    #[test]
    fn test_call_error_wire_roundtrip() {
        let errors = [
            Error::not_found("/org/a11y/bridge/accessible/9"),
            Error::unsupported("org.a11y.atspi.Text"),
            Error::Decode(DecodeError::Mismatch {
                expected: Shape::Int,
                actual: Shape::Str,
            }),
            Error::timeout("call", 5000),
            Error::Disconnected,
        ];

        for err in errors {
            let back = Error::from_wire(err.wire_name(), &err.wire_detail());
            assert_eq!(back.wire_name(), err.wire_name());
            assert_eq!(back.wire_detail(), err.wire_detail());
        }
    }

    #[test]
    fn test_unknown_wire_name_is_remote() {
        let err = Error::from_wire("org.example.Weird", "boom");
        assert!(matches!(err, Error::Remote { ref name, .. } if name == "org.example.Weird"));
        assert_eq!(err.wire_name(), "org.example.Weird");
    }

    #[test]
    fn test_is_call_error() {
        assert!(Error::not_found("x").is_call_error());
        assert!(Error::unsupported("x").is_call_error());
        assert!(Error::timeout("x", 1).is_call_error());
        assert!(!Error::Disconnected.is_call_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::Disconnected.is_connection_error());
        assert!(Error::connection("refused").is_connection_error());
        assert!(Error::connection_timeout(100).is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Disconnected.is_recoverable());
        assert!(Error::timeout("call", 10).is_recoverable());
        assert!(!Error::unsupported("x").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
