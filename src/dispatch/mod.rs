//! Interface dispatcher.
//!
//! Connects the bus to the tree in both directions.
//!
//! # Inbound
//!
//! 1. `InboundDispatcher::route` - Resolve the path against a registry snapshot
//! 2. Check the interface against the node's declared capabilities
//! 3. Parse `(interface, member, args)` into a [`MethodRequest`]
//! 4. Queue to the owner thread and await the reply within the call timeout
//! 5. `CallExecutor` - Re-resolve, run the handler, apply tree effects
//!
//! # Outbound
//!
//! [`BridgeObserver`] turns tree changes into registry updates, path
//! publications, signals, bridge events and feedback.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Typed method requests per interface |
//! | `inbound` | Dispatch-side routing and timeouts |
//! | `owner` | Owner queue, executor, owner thread |
//! | `handlers` | Per-interface execution |
//! | `outbound` | Tree observer and bus sink |

// ============================================================================
// Submodules
// ============================================================================

/// Per-interface execution on the owner thread.
mod handlers;

/// Dispatch-side call routing.
pub mod inbound;

/// Tree observation and signal emission.
pub mod outbound;

/// Owner-thread marshaling.
pub mod owner;

/// Typed method requests.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use inbound::{DEFAULT_CALL_TIMEOUT, InboundDispatcher};
pub use outbound::{BridgeObserver, BusSink};
pub use owner::{OwnerContext, OwnerQueue, OwnerThread, TreeJob};
pub use request::{
    AccessibleRequest, ActionRequest, CollectionRequest, ComponentRequest, MethodRequest,
    SelectionRequest, TextRequest, ValueRequest,
};
