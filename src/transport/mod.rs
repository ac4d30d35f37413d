//! Bus transport layer.
//!
//! This module owns everything between the bridge and the bus daemon:
//! opening links, joining the bus, keeping paths published, and serving
//! inbound calls.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌─────────────────┐
//! │  Bridge (Rust)       │                         │  Bus daemon     │
//! │                      │      JSON frames        │                 │
//! │  ConnectionManager   │◄───────────────────────►│  routes calls,  │
//! │  → Transport::open   │  WebSocket / in-memory  │  replies and    │
//! │  → CallRouter        │                         │  signals        │
//! └──────────────────────┘                         └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionManager::start` - Spawn the supervisor
//! 2. `Transport::open` - Open a link to the bus
//! 3. `handshake` - Claim the well-known name and receive a unique name
//! 4. Republish exposed paths, serve calls, emit signals
//! 5. On loss - Cancel in-flight calls, back off, go to 2
//! 6. `ConnectionManager::shutdown` - Close for good
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Exponential reconnect delays |
//! | `link` | `BusLink`, the `Transport` seam, and the handshake |
//! | `connection` | Connection manager and its event loop |
//! | `websocket` | WebSocket client transport |
//! | `memory` | In-process bus daemon |
//! | `client` | Remote-peer API for calling into bridges |

// ============================================================================
// Submodules
// ============================================================================

/// Exponential reconnect delays.
pub mod backoff;

/// Bus connection lifecycle and event loop.
pub mod connection;

/// Links, transports, and the bus handshake.
pub mod link;

/// In-process bus daemon.
pub mod memory;

/// Remote-peer API.
pub mod client;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::Backoff;
pub use client::BusClient;
pub use connection::{CallRouter, CancelFlag, ConnectionConfig, ConnectionManager, ConnectionState};
pub use link::{BusLink, Transport, handshake};
pub use memory::{MemoryBus, MemoryTransport};
pub use websocket::WebSocketTransport;
