//! In-process bus daemon.
//!
//! [`MemoryBus`] routes frames between peers the way a bus daemon does:
//! it assigns unique names, grants well-known names, forwards calls and
//! replies, broadcasts signals, and tells peers when another peer leaves.
//! It can also serve peers over WebSocket.
//!
//! # Fault Injection
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`MemoryBus::drop_peer`] | Forcibly disconnects one peer |
//! | [`MemoryBus::stop`] | Disconnects everyone and refuses new links |
//! | [`MemoryBus::restart`] | Accepts links again |
//!
//! When a peer goes away, every call it was serving is answered with a
//! `Disconnected` error and every call it made is reported to the callee
//! with `PeerGone`.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BusName, CallSerial, ObjectPath};
use crate::protocol::{
    DecodeError, Message, MethodReply, decode_message, encode_message, salvage_call,
};

use super::link::{BusLink, Transport};

// ============================================================================
// Types
// ============================================================================

type PeerId = u64;

/// A connected peer.
struct Peer {
    /// Frames to the peer.
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Assigned after `Hello`.
    unique_name: Option<BusName>,
    /// Claimed well-known name.
    well_known: Option<BusName>,
    /// Paths the peer published, with their interfaces.
    objects: FxHashMap<ObjectPath, Vec<String>>,
}

/// A call awaiting its reply.
struct PendingCall {
    caller: PeerId,
    callee: PeerId,
}

#[derive(Default)]
struct Routing {
    peers: FxHashMap<PeerId, Peer>,
    names: FxHashMap<BusName, PeerId>,
    pending: FxHashMap<CallSerial, PendingCall>,
}

struct BusInner {
    available: AtomicBool,
    next_peer: AtomicU64,
    routing: Mutex<Routing>,
}

// ============================================================================
// MemoryBus
// ============================================================================

/// An in-process bus daemon.
///
/// Cheap to clone; clones share the same bus.
///
/// # Example
///
/// ```ignore
/// let bus = MemoryBus::new();
/// let (bridge, owner) = Bridge::builder()
///     .identity("org.example.App")
///     .transport(bus.transport())
///     .build()?;
///
/// let client = BusClient::connect(&bus.transport(), Duration::from_secs(1)).await?;
/// ```
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("available", &self.is_available())
            .field("peers", &self.peer_count())
            .finish()
    }
}

// ============================================================================
// MemoryBus - Constructor
// ============================================================================

impl MemoryBus {
    /// Creates a running bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                available: AtomicBool::new(true),
                next_peer: AtomicU64::new(1),
                routing: Mutex::new(Routing::default()),
            }),
        }
    }

    /// Returns a transport that opens links to this bus.
    #[must_use]
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { bus: self.clone() }
    }
}

// ============================================================================
// MemoryBus - Introspection
// ============================================================================

impl MemoryBus {
    /// Returns `true` if the bus accepts links.
    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Returns the number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.routing.lock().peers.len()
    }

    /// Returns `true` if `name` is currently owned.
    #[must_use]
    pub fn has_name(&self, name: &BusName) -> bool {
        self.inner.routing.lock().names.contains_key(name)
    }

    /// Returns the paths published by the owner of `name`, sorted.
    #[must_use]
    pub fn published(&self, name: &BusName) -> Vec<ObjectPath> {
        let routing = self.inner.routing.lock();
        let mut paths: Vec<_> = routing
            .names
            .get(name)
            .and_then(|id| routing.peers.get(id))
            .map(|peer| peer.objects.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Returns the interfaces published at `path` by the owner of `name`.
    #[must_use]
    pub fn interfaces_at(&self, name: &BusName, path: &ObjectPath) -> Option<Vec<String>> {
        let routing = self.inner.routing.lock();
        let id = routing.names.get(name)?;
        routing.peers.get(id)?.objects.get(path).cloned()
    }

    /// Returns the number of calls awaiting a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.routing.lock().pending.len()
    }
}

// ============================================================================
// MemoryBus - Fault Injection
// ============================================================================

impl MemoryBus {
    /// Forcibly disconnects the owner of `name`.
    ///
    /// Returns `false` if nobody owns it.
    pub fn drop_peer(&self, name: &BusName) -> bool {
        let id = self.inner.routing.lock().names.get(name).copied();
        match id {
            Some(id) => {
                info!(%name, "Dropping peer");
                self.disconnect(id);
                true
            }
            None => false,
        }
    }

    /// Disconnects every peer and refuses new links until [`restart`].
    ///
    /// [`restart`]: MemoryBus::restart
    pub fn stop(&self) {
        info!("Memory bus stopping");
        self.inner.available.store(false, Ordering::SeqCst);
        let ids: Vec<_> = self.inner.routing.lock().peers.keys().copied().collect();
        for id in ids {
            self.disconnect(id);
        }
    }

    /// Accepts links again after [`stop`](MemoryBus::stop).
    pub fn restart(&self) {
        info!("Memory bus restarting");
        self.inner.available.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// MemoryBus - Links
// ============================================================================

impl MemoryBus {
    /// Attaches a new peer and returns its end of the link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] while the bus is stopped.
    pub fn open_link(&self) -> Result<BusLink> {
        if !self.is_available() {
            return Err(Error::connection("bus unavailable"));
        }

        let (bus_side, peer_side) = BusLink::pair();
        let id = self.inner.next_peer.fetch_add(1, Ordering::SeqCst);
        self.inner.routing.lock().peers.insert(
            id,
            Peer {
                tx: bus_side.outgoing,
                unique_name: None,
                well_known: None,
                objects: FxHashMap::default(),
            },
        );

        let bus = self.clone();
        let mut incoming = bus_side.incoming;
        tokio::spawn(async move {
            while let Some(bytes) = incoming.recv().await {
                bus.route(id, &bytes);
            }
            bus.disconnect(id);
        });

        trace!(peer = id, "Peer attached");
        Ok(peer_side)
    }

    fn send_to(routing: &Routing, id: PeerId, message: &Message) {
        let Some(peer) = routing.peers.get(&id) else {
            return;
        };
        match encode_message(message) {
            Ok(bytes) => {
                let _ = peer.tx.send(bytes);
            }
            Err(e) => warn!(error = %e, "Failed to encode frame"),
        }
    }

    fn disconnect(&self, id: PeerId) {
        let mut routing = self.inner.routing.lock();
        let Some(peer) = routing.peers.remove(&id) else {
            return;
        };
        if let Some(name) = &peer.unique_name {
            routing.names.remove(name);
        }
        if let Some(name) = &peer.well_known {
            routing.names.remove(name);
        }

        let orphaned: Vec<_> = routing
            .pending
            .iter()
            .filter(|(_, call)| call.caller == id || call.callee == id)
            .map(|(serial, _)| *serial)
            .collect();
        for serial in orphaned {
            let Some(call) = routing.pending.remove(&serial) else {
                continue;
            };
            if call.callee == id {
                let reply = MethodReply::failure(serial, None, &Error::Disconnected);
                Self::send_to(&routing, call.caller, &Message::Reply(reply));
            }
        }

        if let Some(name) = peer.unique_name {
            let gone = Message::PeerGone { name };
            let others: Vec<_> = routing.peers.keys().copied().collect();
            for other in others {
                Self::send_to(&routing, other, &gone);
            }
        }

        debug!(peer = id, "Peer disconnected");
    }
}

// ============================================================================
// MemoryBus - Routing
// ============================================================================

impl MemoryBus {
    fn route(&self, from: PeerId, bytes: &[u8]) {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.route_broken(from, bytes, &e);
                return;
            }
        };
        trace!(peer = from, kind = message.kind(), "Routing frame");

        let mut routing = self.inner.routing.lock();
        if !routing.peers.contains_key(&from) {
            return;
        }

        match message {
            Message::Hello { name } => Self::route_hello(&mut routing, from, name),
            Message::Publish { path, interfaces } => {
                if let Some(peer) = routing.peers.get_mut(&from) {
                    peer.objects.insert(path, interfaces);
                }
            }
            Message::Withdraw { path } => {
                if let Some(peer) = routing.peers.get_mut(&from) {
                    peer.objects.remove(&path);
                }
            }
            Message::Call(mut call) => {
                let caller = routing.peers.get(&from).and_then(|p| p.unique_name.clone());
                call.sender = caller.clone();
                let callee = call
                    .destination
                    .as_ref()
                    .and_then(|dest| routing.names.get(dest))
                    .copied();
                match callee {
                    Some(callee) => {
                        routing.pending.insert(call.serial, PendingCall { caller: from, callee });
                        Self::send_to(&routing, callee, &Message::Call(call));
                    }
                    None => {
                        let reply = MethodReply::failure(call.serial, caller, &Error::Disconnected);
                        Self::send_to(&routing, from, &Message::Reply(reply));
                    }
                }
            }
            Message::Reply(reply) => {
                let caller = routing
                    .pending
                    .get(&reply.serial)
                    .filter(|pending| pending.callee == from)
                    .map(|pending| pending.caller);
                match caller {
                    Some(caller) => {
                        routing.pending.remove(&reply.serial);
                        Self::send_to(&routing, caller, &Message::Reply(reply));
                    }
                    None => trace!(serial = %reply.serial, "Dropping unsolicited reply"),
                }
            }
            Message::Signal(mut signal) => {
                signal.sender = routing.peers.get(&from).and_then(|p| p.unique_name.clone());
                let signal = Message::Signal(signal);
                let others: Vec<_> = routing.peers.keys().copied().filter(|id| *id != from).collect();
                for other in others {
                    Self::send_to(&routing, other, &signal);
                }
            }
            other => warn!(kind = other.kind(), "Peer sent a bus-only frame"),
        }
    }

    fn route_hello(routing: &mut Routing, from: PeerId, name: Option<BusName>) {
        if let Some(name) = &name
            && routing.names.get(name).is_some_and(|owner| *owner != from)
        {
            let refusal = Message::NameError {
                name: name.to_string(),
                reason: "name already owned".to_string(),
            };
            Self::send_to(routing, from, &refusal);
            return;
        }

        let unique = match BusName::new(format!(":1.{from}")) {
            Ok(unique) => unique,
            Err(e) => {
                warn!(error = %e, "Failed to assign unique name");
                return;
            }
        };
        routing.names.insert(unique.clone(), from);
        if let Some(name) = &name {
            routing.names.insert(name.clone(), from);
        }
        if let Some(peer) = routing.peers.get_mut(&from) {
            peer.unique_name = Some(unique.clone());
            peer.well_known = name;
        }
        Self::send_to(routing, from, &Message::Welcome { unique_name: unique });
    }

    /// Answers an undecodable call with a decode error.
    ///
    /// The callee never sees it; the bus answers on its behalf.
    fn route_broken(&self, from: PeerId, bytes: &[u8], error: &Error) {
        warn!(peer = from, error = %error, "Undecodable frame");
        if let Some(broken) = salvage_call(bytes) {
            let reply = MethodReply::failure(
                broken.serial,
                None,
                &Error::Decode(DecodeError::malformed(error.to_string())),
            );
            let routing = self.inner.routing.lock();
            Self::send_to(&routing, from, &Message::Reply(reply));
        }
    }
}

// ============================================================================
// MemoryBus - WebSocket
// ============================================================================

impl MemoryBus {
    /// Serves this bus to WebSocket peers.
    ///
    /// Binds `addr` (port 0 for random) and returns the bound address.
    /// Each accepted socket becomes one peer; text frames carry bus frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn serve_websocket(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "Memory bus serving WebSocket");

        let bus = self.clone();
        tokio::spawn(async move {
            bus.accept_loop(listener).await;
        });
        Ok(local)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let bus = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bus.handle_socket(stream).await {
                            warn!(error = %e, ?peer_addr, "WebSocket peer failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    async fn handle_socket(&self, stream: TcpStream) -> Result<()> {
        let ws_stream = accept_async(stream).await?;
        let mut link = self.open_link()?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            if link.outgoing.send(text.as_bytes().to_vec()).is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            if link.outgoing.send(data.to_vec()).is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(error = %e, "WebSocket peer error");
                            break;
                        }
                        _ => {}
                    }
                }

                frame = link.incoming.recv() => {
                    let Some(bytes) = frame else {
                        let _ = ws_write.close().await;
                        break;
                    };
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if ws_write.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// [`Transport`] opening links on a [`MemoryBus`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    bus: MemoryBus,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<BusLink> {
        self.bus.open_link()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
