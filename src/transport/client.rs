//! Remote-peer API.
//!
//! [`BusClient`] is what an assistive-technology client looks like from
//! the bus: it joins without a well-known name, calls methods on a
//! destination, and receives broadcast signals.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BusName, CallSerial, ObjectPath};
use crate::protocol::{
    Args, Message, MethodCall, Signal, WireValue, decode_message, encode_message,
};

use super::link::{BusLink, Transport, handshake};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Types
// ============================================================================

/// Map of call serials to reply channels.
type CorrelationMap = FxHashMap<CallSerial, oneshot::Sender<Result<WireValue>>>;

// ============================================================================
// BusClient
// ============================================================================

/// A bus peer that calls into bridges.
///
/// # Example
///
/// ```ignore
/// let client = BusClient::connect(&transport, Duration::from_secs(1)).await?;
/// let name = client
///     .call(&app, &path, interfaces::ACCESSIBLE, "GetName", Args::empty())
///     .await?;
/// ```
pub struct BusClient {
    unique_name: BusName,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    correlation: Arc<Mutex<CorrelationMap>>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<Signal>>>,
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("unique_name", &self.unique_name)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl BusClient {
    /// Opens a link and joins the bus.
    ///
    /// # Errors
    ///
    /// Returns the transport or handshake error.
    pub async fn connect(transport: &dyn Transport, wait: Duration) -> Result<Self> {
        let mut link = transport.open().await?;
        let unique_name = handshake(&mut link, None, wait).await?;

        let BusLink { outgoing, incoming } = link;
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_event_loop(
            incoming,
            Arc::clone(&correlation),
            signal_tx,
        ));

        Ok(Self {
            unique_name,
            outgoing,
            correlation,
            signals: Mutex::new(Some(signal_rx)),
        })
    }

    /// Returns the unique name assigned by the bus.
    #[inline]
    #[must_use]
    pub fn unique_name(&self) -> &BusName {
        &self.unique_name
    }

    /// Returns the number of calls awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Takes the signal stream. Returns `None` after the first call.
    pub fn take_signals(&self) -> Option<mpsc::UnboundedReceiver<Signal>> {
        self.signals.lock().take()
    }

    /// Calls a method with the default timeout (10s).
    ///
    /// # Errors
    ///
    /// - the error carried by an error reply
    /// - [`Error::Disconnected`] if the link closes first
    /// - [`Error::Timeout`] if no reply arrives in time
    pub async fn call(
        &self,
        destination: &BusName,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: Args,
    ) -> Result<WireValue> {
        self.call_with_timeout(destination, path, interface, member, args, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Calls a method with a custom timeout.
    ///
    /// # Errors
    ///
    /// See [`BusClient::call`].
    pub async fn call_with_timeout(
        &self,
        destination: &BusName,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: Args,
        call_timeout: Duration,
    ) -> Result<WireValue> {
        let call = MethodCall::new(path.clone(), interface, member, args).to(destination.clone());
        self.send_call(call, call_timeout).await
    }

    /// Sends a prepared call and waits for its reply.
    ///
    /// # Errors
    ///
    /// See [`BusClient::call`].
    pub async fn send_call(&self, call: MethodCall, call_timeout: Duration) -> Result<WireValue> {
        let serial = call.serial;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.correlation.lock().insert(serial, reply_tx);

        let frame = encode_message(&Message::Call(call))?;
        self.send_raw(frame)?;

        match timeout(call_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.correlation.lock().remove(&serial);
                Err(Error::timeout(
                    format!("call {serial}"),
                    call_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Sends raw frame bytes, bypassing encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the link is closed.
    pub fn send_raw(&self, frame: Vec<u8>) -> Result<()> {
        self.outgoing.send(frame).map_err(|_| Error::Disconnected)
    }

    /// Registers interest in the reply to a call sent with [`send_raw`].
    ///
    /// [`send_raw`]: BusClient::send_raw
    pub fn expect_reply(&self, serial: CallSerial) -> oneshot::Receiver<Result<WireValue>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.correlation.lock().insert(serial, reply_tx);
        reply_rx
    }

    async fn run_event_loop(
        mut incoming: mpsc::UnboundedReceiver<Vec<u8>>,
        correlation: Arc<Mutex<CorrelationMap>>,
        signal_tx: mpsc::UnboundedSender<Signal>,
    ) {
        while let Some(bytes) = incoming.recv().await {
            match decode_message(&bytes) {
                Ok(Message::Reply(reply)) => {
                    let tx = correlation.lock().remove(&reply.serial);
                    match tx {
                        Some(tx) => {
                            let _ = tx.send(reply.into_result());
                        }
                        None => trace!(serial = %reply.serial, "Reply for unknown call"),
                    }
                }
                Ok(Message::Signal(signal)) => {
                    let _ = signal_tx.send(signal);
                }
                Ok(other) => trace!(kind = other.kind(), "Ignoring frame"),
                Err(e) => warn!(error = %e, "Undecodable frame"),
            }
        }

        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(Error::Disconnected));
        }
        if count > 0 {
            debug!(count, "Failed pending calls on link loss");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::NodeId;
    use crate::protocol::interfaces;
    use crate::transport::MemoryBus;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_connect_assigns_unique_name() {
        let bus = MemoryBus::new();
        let first = BusClient::connect(&bus.transport(), WAIT).await.expect("first");
        let second = BusClient::connect(&bus.transport(), WAIT).await.expect("second");
        assert!(first.unique_name().is_unique());
        assert_ne!(first.unique_name(), second.unique_name());
    }

    #[tokio::test]
    async fn test_call_to_missing_destination_is_disconnected() {
        let bus = MemoryBus::new();
        let client = BusClient::connect(&bus.transport(), WAIT).await.expect("client");
        let nobody = BusName::new("org.example.Nobody").expect("name");
        let err = client
            .call(
                &nobody,
                &ObjectPath::for_node(NodeId::new(0, 0)),
                interfaces::ACCESSIBLE,
                "GetName",
                Args::empty(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_signals_taken_once() {
        let bus = MemoryBus::new();
        let client = BusClient::connect(&bus.transport(), WAIT).await.expect("client");
        assert!(client.take_signals().is_some());
        assert!(client.take_signals().is_none());
    }

    #[tokio::test]
    async fn test_bus_stop_fails_pending_calls() {
        let bus = MemoryBus::new();
        let client = BusClient::connect(&bus.transport(), WAIT).await.expect("client");
        let receiver = client.expect_reply(CallSerial::generate());
        bus.stop();
        let result = timeout(WAIT, receiver).await.expect("in time").expect("sent");
        assert!(matches!(result, Err(Error::Disconnected)));
    }
}
