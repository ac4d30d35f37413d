//! Bridge facade and configuration.
//!
//! This module wires the bus connection, the path registry and the
//! dispatcher into a single [`Bridge`].
//!
//! # Example
//!
//! ```ignore
//! use a11y_bus_bridge::Bridge;
//!
//! let (bridge, owner) = Bridge::builder()
//!     .identity("org.example.App")
//!     .bus_url("ws://127.0.0.1:7000")
//!     .build()?;
//! ```
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bridge`] | Connection, registry and tree observation |
//! | [`BridgeBuilder`] | Fluent configuration |
//! | [`BridgeConfig`] | Serializable settings with defaults |

// ============================================================================
// Submodules
// ============================================================================

/// Bridge builder.
pub mod builder;

/// Serializable settings.
pub mod config;

/// Bridge coordinator.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeBuilder;
pub use config::BridgeConfig;
pub use core::Bridge;
