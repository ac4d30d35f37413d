//! Bridge builder for configuration.
//!
//! Provides a fluent API for configuring and creating [`Bridge`] instances.
//!
//! # Example
//!
//! ```ignore
//! use a11y_bus_bridge::Bridge;
//!
//! let (bridge, owner) = Bridge::builder()
//!     .identity("org.example.App")
//!     .bus_url("ws://127.0.0.1:7000")
//!     .call_timeout(Duration::from_secs(2))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::dispatch::InboundDispatcher;
use crate::dispatch::owner::{self, CallExecutor, OwnerContext};
use crate::error::{Error, Result};
use crate::event::EventHub;
use crate::feedback::{Feedback, FeedbackProvider, FeedbackTiming, NoopFeedback};
use crate::registry::ObjectPathRegistry;
use crate::transport::{ConnectionManager, Transport, WebSocketTransport};

use super::config::BridgeConfig;
use super::core::Bridge;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`] instance.
///
/// Use [`Bridge::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct BridgeBuilder {
    config: BridgeConfig,
    transport: Option<Arc<dyn Transport>>,
    feedback: Option<Arc<dyn FeedbackProvider>>,
}

impl std::fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport.as_ref().map(|t| t.describe()))
            .field("has_feedback", &self.feedback.is_some())
            .finish()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeBuilder {
    /// Replaces all settings with a loaded config.
    ///
    /// Later builder calls still override individual fields.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the well-known bus name.
    #[inline]
    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.config.identity = Some(identity.into());
        self
    }

    /// Sets the bus daemon URL, used when no transport is given.
    #[inline]
    #[must_use]
    pub fn bus_url(mut self, url: impl Into<String>) -> Self {
        self.config.bus_url = Some(url.into());
        self
    }

    /// Sets the transport used to reach the bus.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the sound and vibration provider.
    ///
    /// Defaults to [`NoopFeedback`].
    #[inline]
    #[must_use]
    pub fn feedback(mut self, provider: impl FeedbackProvider + 'static) -> Self {
        self.feedback = Some(Arc::new(provider));
        self
    }

    /// Sets the call timeout.
    #[inline]
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_call_timeout(timeout);
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_handshake_timeout(timeout);
        self
    }

    /// Sets the reconnect delay range.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.config = self.config.with_reconnect(initial, max);
        self
    }

    /// Sets whether feedback plays before or after signals.
    #[inline]
    #[must_use]
    pub fn feedback_timing(mut self, timing: FeedbackTiming) -> Self {
        self.config = self.config.with_feedback_timing(timing);
        self
    }

    /// Sets the focus vibration.
    #[inline]
    #[must_use]
    pub fn vibration(mut self, duration_ms: u64, intensity: f32) -> Self {
        self.config = self.config.with_vibration(duration_ms, intensity);
        self
    }
}

// ============================================================================
// Build
// ============================================================================

impl BridgeBuilder {
    /// Builds the bridge and the owner context that serves its calls.
    ///
    /// The bridge is not connected yet; call [`Bridge::start`]. The owner
    /// context belongs to the thread that owns the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if:
    /// - Identity is not set or is not a well-known name
    /// - Neither a transport nor a bus URL is set
    /// - A timing or the vibration intensity is out of range
    pub fn build(self) -> Result<(Bridge, OwnerContext)> {
        let identity = self.config.validate()?;
        let transport = self.resolve_transport()?;
        let provider = self.feedback.unwrap_or_else(|| Arc::new(NoopFeedback));

        debug!(
            identity = %identity,
            transport = %transport.describe(),
            call_timeout_ms = self.config.call_timeout_ms,
            "Building bridge"
        );

        let registry = Arc::new(ObjectPathRegistry::new());
        let events = EventHub::new();
        let (queue, receiver) = owner::channel();

        let executor = CallExecutor::new(Arc::clone(&registry), identity.clone());
        let context = OwnerContext::new(receiver, queue.clone(), executor);

        let dispatcher = InboundDispatcher::new(
            Arc::clone(&registry),
            queue.clone(),
            self.config.call_timeout(),
        );
        let manager = ConnectionManager::new(
            self.config.connection(identity.clone()),
            transport,
            Arc::new(dispatcher),
            events.clone(),
        );
        let feedback = Feedback::new(
            provider,
            self.config.feedback_timing,
            self.config.vibrate_ms,
            self.config.vibrate_intensity,
        );

        let bridge = Bridge::from_parts(
            identity,
            self.config,
            registry,
            Arc::new(manager),
            events,
            feedback,
            queue,
        );
        Ok((bridge, context))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeBuilder {
    /// Uses the explicit transport, or a WebSocket transport for the URL.
    fn resolve_transport(&self) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }
        match self.config.bus_url.as_deref() {
            Some(url) => Ok(Arc::new(WebSocketTransport::new(url)?)),
            None => Err(Error::config(
                "No bus transport configured. Use .transport() or .bus_url() to set one.\n\
                 Example: Bridge::builder().bus_url(\"ws://127.0.0.1:7000\")",
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
