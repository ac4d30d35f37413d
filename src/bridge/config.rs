//! Bridge configuration.
//!
//! Every field has a default, so a config file only lists what it changes.
//! Durations are in milliseconds.
//!
//! # Example
//!
//! ```ignore
//! use a11y_bus_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::from_json_str(r#"{
//!     "identity": "org.example.App",
//!     "bus_url": "ws://127.0.0.1:7000",
//!     "call_timeout_ms": 2000
//! }"#)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::DEFAULT_CALL_TIMEOUT;
use crate::error::{Error, Result};
use crate::feedback::FeedbackTiming;
use crate::identifiers::BusName;
use crate::transport::connection::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_RECONNECT_INITIAL, DEFAULT_RECONNECT_MAX,
};
use crate::transport::{ConnectionConfig, WebSocketTransport};

// ============================================================================
// Constants
// ============================================================================

/// Default vibration length for focus feedback.
pub const DEFAULT_VIBRATE_MS: u64 = 25;

/// Default vibration intensity for focus feedback.
pub const DEFAULT_VIBRATE_INTENSITY: f32 = 0.5;

// ============================================================================
// BridgeConfig
// ============================================================================

/// Serializable bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Well-known bus name, e.g. `org.example.App`.
    pub identity: Option<String>,

    /// Bus daemon URL (`ws://` or `wss://`). Unused when a transport is
    /// supplied directly.
    pub bus_url: Option<String>,

    /// Time a call may spend queued and executing.
    pub call_timeout_ms: u64,

    /// Time the bus has to answer `Hello`.
    pub handshake_timeout_ms: u64,

    /// First reconnect delay.
    pub reconnect_initial_ms: u64,

    /// Reconnect delay cap.
    pub reconnect_max_ms: u64,

    /// Whether feedback plays before or after the signal goes out.
    pub feedback_timing: FeedbackTiming,

    /// Focus vibration length.
    pub vibrate_ms: u64,

    /// Focus vibration intensity, `0.0..=1.0`.
    pub vibrate_intensity: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            identity: None,
            bus_url: None,
            call_timeout_ms: millis(DEFAULT_CALL_TIMEOUT),
            handshake_timeout_ms: millis(DEFAULT_HANDSHAKE_TIMEOUT),
            reconnect_initial_ms: millis(DEFAULT_RECONNECT_INITIAL),
            reconnect_max_ms: millis(DEFAULT_RECONNECT_MAX),
            feedback_timing: FeedbackTiming::default(),
            vibrate_ms: DEFAULT_VIBRATE_MS,
            vibrate_intensity: DEFAULT_VIBRATE_INTENSITY,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a config with every default.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is malformed or has a field
    /// of the wrong type.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid bridge config: {e}")))
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Sets the well-known bus name.
    #[inline]
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Sets the bus daemon URL.
    #[inline]
    #[must_use]
    pub fn with_bus_url(mut self, url: impl Into<String>) -> Self {
        self.bus_url = Some(url.into());
        self
    }

    /// Sets the call timeout.
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = millis(timeout);
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = millis(timeout);
        self
    }

    /// Sets the reconnect delay range.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_ms = millis(initial);
        self.reconnect_max_ms = millis(max);
        self
    }

    /// Sets the feedback timing.
    #[inline]
    #[must_use]
    pub fn with_feedback_timing(mut self, timing: FeedbackTiming) -> Self {
        self.feedback_timing = timing;
        self
    }

    /// Sets the focus vibration.
    #[inline]
    #[must_use]
    pub fn with_vibration(mut self, duration_ms: u64, intensity: f32) -> Self {
        self.vibrate_ms = duration_ms;
        self.vibrate_intensity = intensity;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl BridgeConfig {
    /// Returns the call timeout.
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Builds the connection settings for `identity`.
    #[must_use]
    pub fn connection(&self, identity: BusName) -> ConnectionConfig {
        ConnectionConfig {
            identity,
            handshake_timeout: self.handshake_timeout(),
            reconnect_initial: Duration::from_millis(self.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeConfig {
    /// Checks the settings and parses the identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<BusName> {
        let identity = self.validate_identity()?;
        self.validate_bus_url()?;
        self.validate_timings()?;
        self.validate_vibration()?;
        Ok(identity)
    }

    fn validate_identity(&self) -> Result<BusName> {
        let Some(identity) = self.identity.as_deref() else {
            return Err(Error::config(
                "Bus identity is required. Use .identity() to set it.\n\
                 Example: Bridge::builder().identity(\"org.example.App\")",
            ));
        };
        let name = BusName::new(identity).map_err(|e| {
            Error::config(format!(
                "Invalid bus identity {identity:?}: {e}\n\
                 Use a dotted well-known name like \"org.example.App\"."
            ))
        })?;
        if name.is_unique() {
            return Err(Error::config(format!(
                "Bus identity {identity:?} is a unique name; unique names are assigned by the bus.\n\
                 Use a dotted well-known name like \"org.example.App\"."
            )));
        }
        Ok(name)
    }

    fn validate_bus_url(&self) -> Result<()> {
        if let Some(url) = self.bus_url.as_deref() {
            WebSocketTransport::new(url)?;
        }
        Ok(())
    }

    fn validate_timings(&self) -> Result<()> {
        let fields = [
            ("call_timeout_ms", self.call_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("reconnect_initial_ms", self.reconnect_initial_ms),
            ("reconnect_max_ms", self.reconnect_max_ms),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config(format!("{field} must be greater than zero")));
        }
        if self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(Error::config(format!(
                "reconnect_initial_ms ({}) exceeds reconnect_max_ms ({})",
                self.reconnect_initial_ms, self.reconnect_max_ms
            )));
        }
        Ok(())
    }

    fn validate_vibration(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vibrate_intensity) {
            return Err(Error::config(format!(
                "vibrate_intensity must be within 0.0..=1.0, got {}",
                self.vibrate_intensity
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
