//! Bus connection lifecycle.
//!
//! The [`ConnectionManager`] owns the link to the bus. It joins under the
//! bridge's well-known name, keeps the set of exposed object paths
//! published, routes inbound calls to a [`CallRouter`], and reconnects
//! with backoff when the link drops.
//!
//! # States
//!
//! ```text
//!                 start()
//! Disconnected ───────────► Connecting ◄──────────┐
//!      ▲                        │                 │ link lost
//!      │ shutdown()             │ Welcome         │
//!      │                        ▼                 │
//!      └─────────────────── Registered ───────────┘
//! ```
//!
//! # Event Loop
//!
//! The supervisor task handles, per registered session:
//!
//! - Incoming frames (calls, peer departures)
//! - Outgoing frames queued by the public API (publish, withdraw, signals)
//! - Replies produced by call tasks
//!
//! Every session has an epoch. Frames and replies queued for an older
//! epoch are discarded, so nothing crosses a reconnect.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::event::{BridgeEvent, EventHub};
use crate::identifiers::{BusName, CallSerial, ObjectPath};
use crate::protocol::{
    DecodeError, Message, MethodCall, MethodReply, Signal, WireValue, decode_message,
    salvage_call,
};

use super::backoff::Backoff;
use super::link::{BusLink, Transport, handshake};

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for `Hello` → `Welcome`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default first reconnect delay.
pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_millis(100);

/// Default reconnect delay cap.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Cancellation flag shared between the connection and a running call.
pub type CancelFlag = Arc<AtomicBool>;

/// Map of exposed paths to their interfaces.
type ExposedMap = FxHashMap<ObjectPath, Vec<String>>;

/// Map of in-flight inbound calls.
type InFlightMap = FxHashMap<CallSerial, InFlight>;

/// An inbound call being served.
struct InFlight {
    caller: Option<BusName>,
    cancel: CancelFlag,
    epoch: u64,
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or shut down.
    Disconnected,
    /// Opening a link or waiting to retry.
    Connecting,
    /// Joined the bus; paths are published.
    Registered,
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Well-known name claimed on the bus.
    pub identity: BusName,
    /// Time allowed for the bus to answer `Hello`.
    pub handshake_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_initial: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
}

impl ConnectionConfig {
    /// Creates a config with default timings.
    #[must_use]
    pub fn new(identity: BusName) -> Self {
        Self {
            identity,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_initial: DEFAULT_RECONNECT_INITIAL,
            reconnect_max: DEFAULT_RECONNECT_MAX,
        }
    }
}

// ============================================================================
// CallRouter
// ============================================================================

/// Serves inbound method calls.
///
/// Called on a dispatch task. The returned value or error is sent back as
/// the reply unless `cancel` was set in the meantime.
#[async_trait]
pub trait CallRouter: Send + Sync + 'static {
    /// Serves one call.
    async fn route(&self, call: MethodCall, cancel: CancelFlag) -> Result<WireValue>;
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the supervisor.
enum ConnectionCommand {
    /// Send a frame if the session epoch still matches.
    Send { epoch: u64, message: Message },
    /// Deliver a call reply.
    Reply { epoch: u64, reply: MethodReply },
    /// Shut down for good.
    Shutdown,
}

/// Why a session ended.
enum SessionEnd {
    Lost,
    Shutdown,
}

// ============================================================================
// Shared
// ============================================================================

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    router: Arc<dyn CallRouter>,
    events: EventHub,
    state_tx: watch::Sender<ConnectionState>,
    exposed: Mutex<ExposedMap>,
    in_flight: Mutex<InFlightMap>,
    unique_name: RwLock<Option<BusName>>,
    epoch: AtomicU64,
    started: AtomicBool,
    shutdown: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Cancels in-flight calls matching `filter`. Returns how many.
    fn cancel_calls(&self, filter: impl Fn(&InFlight) -> bool) -> usize {
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|_, call| {
            if filter(call) {
                call.cancel.store(true, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
        before - in_flight.len()
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns the bus connection.
///
/// Several managers may coexist; each holds its own state.
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync`. The public methods never block and
/// may be called from any thread, including the owner thread.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(config, transport, router, EventHub::new());
/// manager.start();
/// manager.wait_registered(Duration::from_secs(5)).await?;
/// manager.publish(path, vec![interfaces::ACCESSIBLE.into()]);
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionCommand>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("identity", &self.shared.config.identity)
            .field("state", &self.state())
            .field("transport", &self.shared.transport.describe())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager - Constructor
// ============================================================================

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        router: Arc<dyn CallRouter>,
        events: EventHub,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                router,
                events,
                state_tx,
                exposed: Mutex::new(ExposedMap::default()),
                in_flight: Mutex::new(InFlightMap::default()),
                unique_name: RwLock::new(None),
                epoch: AtomicU64::new(0),
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    /// Spawns the supervisor task. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if already started or shut down.
    pub fn start(&self) -> Result<()> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::invalid_argument("connection manager was shut down"));
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_argument("connection manager already started"));
        }
        let command_rx = self
            .command_rx
            .lock()
            .take()
            .ok_or_else(|| Error::invalid_argument("connection manager already started"))?;

        info!(
            identity = %self.shared.config.identity,
            transport = %self.shared.transport.describe(),
            "Starting bus connection"
        );
        self.shared.set_state(ConnectionState::Connecting);
        tokio::spawn(Self::supervise(
            Arc::clone(&self.shared),
            command_rx,
            self.command_tx.clone(),
        ));
        Ok(())
    }
}

// ============================================================================
// ConnectionManager - Public API
// ============================================================================

impl ConnectionManager {
    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Returns the unique name of the current session.
    #[must_use]
    pub fn unique_name(&self) -> Option<BusName> {
        self.shared.unique_name.read().clone()
    }

    /// Returns the well-known name.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &BusName {
        &self.shared.config.identity
    }

    /// Returns the number of inbound calls being served.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    /// Returns the number of exposed paths.
    #[must_use]
    pub fn exposed_count(&self) -> usize {
        self.shared.exposed.lock().len()
    }

    /// Waits until the connection is registered.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if not registered in time
    /// - [`Error::Disconnected`] if the manager shuts down first
    pub async fn wait_registered(&self, wait: Duration) -> Result<()> {
        let mut rx = self.subscribe_state();
        let shared = Arc::clone(&self.shared);
        let outcome = timeout(
            wait,
            rx.wait_for(|state| {
                *state == ConnectionState::Registered || shared.shutdown.load(Ordering::SeqCst)
            }),
        )
        .await
        .map_err(|_| Error::connection_timeout(wait.as_millis() as u64))?;

        match outcome {
            Ok(state) if *state == ConnectionState::Registered => Ok(()),
            _ => Err(Error::Disconnected),
        }
    }

    /// Exposes a path with its interfaces.
    ///
    /// The path stays exposed across reconnects until withdrawn.
    pub fn publish(&self, path: ObjectPath, interfaces: Vec<String>) {
        // The state check runs under the lock the supervisor holds while it
        // replays and registers, so either the replay or this frame carries it
        let mut exposed = self.shared.exposed.lock();
        exposed.insert(path.clone(), interfaces.clone());
        self.send_if_registered(Message::Publish { path, interfaces });
    }

    /// Retires an exposed path.
    pub fn withdraw(&self, path: ObjectPath) {
        let mut exposed = self.shared.exposed.lock();
        if exposed.remove(&path).is_none() {
            return;
        }
        self.send_if_registered(Message::Withdraw { path });
    }

    /// Broadcasts a signal.
    ///
    /// Signals raised while not registered are dropped: no remote can hold
    /// a subscription then.
    pub fn emit(&self, signal: Signal) {
        self.send_if_registered(Message::Signal(signal));
    }

    /// Shuts the connection down for good.
    ///
    /// In-flight calls are cancelled. Exposed paths are forgotten by the bus
    /// when the link closes.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(identity = %self.shared.config.identity, "Shutting down bus connection");
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
        if !self.shared.started.load(Ordering::SeqCst) {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }

    fn send_if_registered(&self, message: Message) {
        if self.state() != ConnectionState::Registered {
            debug!(kind = message.kind(), "Not registered, frame dropped");
            return;
        }
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let _ = self
            .command_tx
            .send(ConnectionCommand::Send { epoch, message });
    }
}

// ============================================================================
// ConnectionManager - Supervisor
// ============================================================================

impl ConnectionManager {
    /// Connects, serves, and reconnects until shut down.
    async fn supervise(
        shared: Arc<Shared>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    ) {
        let mut backoff = Backoff::new(
            shared.config.reconnect_initial,
            shared.config.reconnect_max,
        );
        let mut was_registered = false;

        'outer: loop {
            shared.set_state(ConnectionState::Connecting);

            // Connect, discarding stale commands meanwhile
            let establish = Self::establish(&shared);
            tokio::pin!(establish);
            let attempt = loop {
                tokio::select! {
                    result = &mut establish => break result,
                    command = command_rx.recv() => {
                        if Self::is_shutdown(command) {
                            break 'outer;
                        }
                    }
                }
            };

            let (link, unique_name) = match attempt {
                Ok(joined) => joined,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Bus connection failed, retrying"
                    );
                    let pause = sleep(delay);
                    tokio::pin!(pause);
                    loop {
                        tokio::select! {
                            () = &mut pause => break,
                            command = command_rx.recv() => {
                                if Self::is_shutdown(command) {
                                    break 'outer;
                                }
                            }
                        }
                    }
                    continue;
                }
            };

            backoff.reset();
            let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *shared.unique_name.write() = Some(unique_name.clone());

            if let Err(e) = Self::register(&shared, &link) {
                warn!(error = %e, "Republish failed");
                Self::lose_session(&shared);
                continue;
            }

            info!(%unique_name, epoch, "Registered on bus");
            if was_registered {
                shared.events.emit(&BridgeEvent::BusRestored { unique_name });
            }
            was_registered = true;

            match Self::run_session(&shared, link, &mut command_rx, &command_tx, epoch).await {
                SessionEnd::Lost => {
                    warn!(epoch, "Bus connection lost");
                    Self::lose_session(&shared);
                    shared.events.emit(&BridgeEvent::BusLost);
                }
                SessionEnd::Shutdown => break,
            }
        }

        let cancelled = shared.cancel_calls(|_| true);
        if cancelled > 0 {
            debug!(cancelled, "Cancelled in-flight calls on shutdown");
        }
        *shared.unique_name.write() = None;
        shared.set_state(ConnectionState::Disconnected);
        debug!("Connection supervisor terminated");
    }

    /// Opens a link and joins the bus.
    async fn establish(shared: &Shared) -> Result<(BusLink, BusName)> {
        let wait = shared.config.handshake_timeout;
        let mut link = timeout(wait, shared.transport.open())
            .await
            .map_err(|_| Error::connection_timeout(wait.as_millis() as u64))??;
        let unique_name = handshake(&mut link, Some(&shared.config.identity), wait).await?;
        Ok((link, unique_name))
    }

    /// Publishes every exposed path on a fresh link, then enters
    /// `Registered`.
    ///
    /// Both happen under the `exposed` lock. A concurrent publish or
    /// withdraw lands either in the replayed set or, once the lock is
    /// released, on the command queue of this session.
    fn register(shared: &Shared, link: &BusLink) -> Result<()> {
        let exposed = shared.exposed.lock();
        for (path, interfaces) in exposed.iter() {
            link.send(&Message::Publish {
                path: path.clone(),
                interfaces: interfaces.clone(),
            })?;
        }
        shared.set_state(ConnectionState::Registered);
        debug!(count = exposed.len(), "Republished exposed paths");
        Ok(())
    }

    fn lose_session(shared: &Shared) {
        shared.set_state(ConnectionState::Connecting);
        *shared.unique_name.write() = None;
        let cancelled = shared.cancel_calls(|_| true);
        if cancelled > 0 {
            debug!(cancelled, "Cancelled in-flight calls on bus loss");
        }
    }

    fn is_shutdown(command: Option<ConnectionCommand>) -> bool {
        match command {
            Some(ConnectionCommand::Shutdown) | None => true,
            Some(_) => {
                trace!("Discarding command queued for a previous session");
                false
            }
        }
    }
}

// ============================================================================
// ConnectionManager - Session
// ============================================================================

impl ConnectionManager {
    /// Event loop for one registered session.
    async fn run_session(
        shared: &Arc<Shared>,
        mut link: BusLink,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
        command_tx: &mpsc::UnboundedSender<ConnectionCommand>,
        epoch: u64,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                // Frames from the bus
                frame = link.incoming.recv() => {
                    match frame {
                        Some(bytes) => {
                            if Self::handle_frame(shared, &link, command_tx, epoch, &bytes).is_err() {
                                return SessionEnd::Lost;
                            }
                        }
                        None => {
                            debug!("Bus link closed");
                            return SessionEnd::Lost;
                        }
                    }
                }

                // Commands from the API and call tasks
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { epoch: queued, message }) => {
                            if queued != epoch {
                                trace!(kind = message.kind(), "Discarding stale frame");
                                continue;
                            }
                            if let Err(e) = link.send(&message) {
                                debug!(error = %e, "Send failed");
                                return SessionEnd::Lost;
                            }
                        }

                        Some(ConnectionCommand::Reply { epoch: queued, reply }) => {
                            let entry = shared.in_flight.lock().remove(&reply.serial);
                            let live = entry.is_some_and(|call| {
                                call.epoch == epoch
                                    && queued == epoch
                                    && !call.cancel.load(Ordering::SeqCst)
                            });
                            if !live {
                                trace!(serial = %reply.serial, "Discarding reply to cancelled call");
                                continue;
                            }
                            if let Err(e) = link.send(&Message::Reply(reply)) {
                                debug!(error = %e, "Reply send failed");
                                return SessionEnd::Lost;
                            }
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!("Shutdown command received");
                            return SessionEnd::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Handles one frame from the bus.
    fn handle_frame(
        shared: &Arc<Shared>,
        link: &BusLink,
        command_tx: &mpsc::UnboundedSender<ConnectionCommand>,
        epoch: u64,
        bytes: &[u8],
    ) -> Result<()> {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Undecodable frame from bus");
                if let Some(broken) = salvage_call(bytes) {
                    let error = Error::Decode(DecodeError::malformed(e.to_string()));
                    let reply = MethodReply::failure(broken.serial, broken.sender, &error);
                    link.send(&Message::Reply(reply))?;
                }
                return Ok(());
            }
        };

        match message {
            Message::Call(call) => Self::spawn_call(shared, command_tx, epoch, call),
            Message::PeerGone { name } => {
                let cancelled = shared.cancel_calls(|call| call.caller.as_ref() == Some(&name));
                if cancelled > 0 {
                    debug!(%name, cancelled, "Caller left, calls cancelled");
                }
            }
            Message::Reply(reply) => {
                trace!(serial = %reply.serial, "Ignoring reply, no outbound calls");
            }
            other => trace!(kind = other.kind(), "Ignoring frame"),
        }
        Ok(())
    }

    /// Runs a call on a dispatch task and queues its reply.
    fn spawn_call(
        shared: &Arc<Shared>,
        command_tx: &mpsc::UnboundedSender<ConnectionCommand>,
        epoch: u64,
        call: MethodCall,
    ) {
        let serial = call.serial;
        let caller = call.sender.clone();
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));

        {
            let mut in_flight = shared.in_flight.lock();
            if in_flight.contains_key(&serial) {
                warn!(%serial, "Duplicate call serial ignored");
                return;
            }
            in_flight.insert(
                serial,
                InFlight {
                    caller: caller.clone(),
                    cancel: Arc::clone(&cancel),
                    epoch,
                },
            );
        }

        trace!(%serial, interface = %call.interface, member = %call.member, "Inbound call");
        let router = Arc::clone(&shared.router);
        let command_tx = command_tx.clone();
        tokio::spawn(async move {
            let result = router.route(call, cancel).await;
            if let Err(e) = &result
                && !e.is_call_error()
                && !matches!(e, Error::Disconnected)
            {
                error!(error = %e, %serial, "Call failed");
            }
            let reply = MethodReply::from_result(serial, caller, result);
            let _ = command_tx.send(ConnectionCommand::Reply { epoch, reply });
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::NodeId;
    use crate::event::EventKind;
    use crate::protocol::{Args, encode_message, interfaces};
    use crate::transport::{BusClient, MemoryBus};

    const WAIT: Duration = Duration::from_secs(2);

    struct Echo;

    #[async_trait]
    impl CallRouter for Echo {
        async fn route(&self, call: MethodCall, _cancel: CancelFlag) -> Result<WireValue> {
            Ok(WireValue::Str(call.member))
        }
    }

    struct Stall;

    #[async_trait]
    impl CallRouter for Stall {
        async fn route(&self, _call: MethodCall, _cancel: CancelFlag) -> Result<WireValue> {
            sleep(Duration::from_secs(60)).await;
            Ok(WireValue::Unit)
        }
    }

    fn app_name() -> BusName {
        BusName::new("org.example.App").expect("name")
    }

    fn manager(bus: &MemoryBus, router: Arc<dyn CallRouter>) -> ConnectionManager {
        let mut config = ConnectionConfig::new(app_name());
        config.reconnect_initial = Duration::from_millis(10);
        config.reconnect_max = Duration::from_millis(50);
        ConnectionManager::new(config, Arc::new(bus.transport()), router, EventHub::new())
    }

    fn path(index: u32) -> ObjectPath {
        ObjectPath::for_node(NodeId::new(index, 0))
    }

    async fn until(mut check: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition in time");
    }

    #[tokio::test]
    async fn test_registers_and_serves_calls() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Echo));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");
        assert!(manager.unique_name().is_some());

        let client = BusClient::connect(&bus.transport(), WAIT).await.expect("client");
        let value = client
            .call(&app_name(), &path(0), interfaces::ACCESSIBLE, "GetName", Args::empty())
            .await
            .expect("call");
        assert_eq!(value, WireValue::Str("GetName".into()));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Echo));
        manager.start().expect("start");
        assert!(manager.start().is_err());
    }

    #[tokio::test]
    async fn test_publish_before_registration_is_replayed() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Echo));
        manager.publish(path(1), vec![interfaces::ACCESSIBLE.to_string()]);
        manager.publish(path(2), vec![interfaces::ACCESSIBLE.to_string()]);
        manager.withdraw(path(2));

        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");
        until(|| !bus.published(&app_name()).is_empty()).await;
        assert_eq!(bus.published(&app_name()), vec![path(1)]);
    }

    #[tokio::test]
    async fn test_reconnects_and_republishes() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Echo));
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");
        manager.publish(path(3), vec![interfaces::ACCESSIBLE.to_string()]);
        until(|| bus.published(&app_name()) == vec![path(3)]).await;

        bus.stop();
        until(|| manager.state() == ConnectionState::Connecting).await;
        bus.restart();

        manager.wait_registered(WAIT).await.expect("re-registered");
        until(|| bus.published(&app_name()) == vec![path(3)]).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_during_reconnect_reaches_bus() {
        let bus = MemoryBus::new();
        let manager = Arc::new(manager(&bus, Arc::new(Echo)));
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");

        let publisher = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                for index in 0..2000 {
                    manager.publish(path(index), vec![interfaces::ACCESSIBLE.to_string()]);
                    if index % 4 == 0 {
                        manager.withdraw(path(index));
                    }
                    if index % 100 == 0 {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        };
        for _ in 0..5 {
            let _ = bus.drop_peer(&app_name());
            sleep(Duration::from_millis(3)).await;
        }
        tokio::task::spawn_blocking(move || publisher.join())
            .await
            .expect("join")
            .expect("publisher");

        manager.wait_registered(WAIT).await.expect("re-registered");
        let mut expected: Vec<_> = (0..2000).filter(|index| index % 4 != 0).map(path).collect();
        expected.sort();
        assert_eq!(manager.exposed_count(), expected.len());
        until(|| bus.published(&app_name()) == expected).await;
    }

    #[tokio::test]
    async fn test_bus_loss_fails_in_flight_call() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Stall));
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");

        let client = BusClient::connect(&bus.transport(), WAIT).await.expect("client");
        let app = app_name();
        let target = path(0);
        let call = client.call(&app, &target, interfaces::ACTION, "DoAction", Args::empty());
        let drop_later = async {
            until(|| manager.in_flight_count() == 1).await;
            assert!(bus.drop_peer(&app_name()));
        };
        let (result, ()) = tokio::join!(call, drop_later);

        assert!(matches!(result, Err(Error::Disconnected)));
        until(|| manager.in_flight_count() == 0).await;
        manager.wait_registered(WAIT).await.expect("re-registered");
    }

    #[tokio::test]
    async fn test_peer_gone_cancels_calls() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Stall));
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");

        let client = BusClient::connect(&bus.transport(), WAIT).await.expect("client");
        let serial = CallSerial::generate();
        let mut call = MethodCall::new(path(0), interfaces::ACTION, "DoAction", Args::empty())
            .to(app_name());
        call.serial = serial;
        let _reply = client.expect_reply(serial);
        client
            .send_raw(encode_message(&Message::Call(call)).expect("encode"))
            .expect("send");
        until(|| manager.in_flight_count() == 1).await;

        let client_name = client.unique_name().clone();
        drop(client);
        assert!(bus.drop_peer(&client_name) || !bus.has_name(&client_name));
        until(|| manager.in_flight_count() == 0).await;
    }

    #[tokio::test]
    async fn test_emit_dropped_while_not_registered() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Echo));
        manager.emit(Signal::new(
            path(0),
            interfaces::EVENT_FOCUS,
            "Focus",
            "",
            Args::empty(),
        ));
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");
        assert_eq!(manager.exposed_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let bus = MemoryBus::new();
        let manager = manager(&bus, Arc::new(Echo));
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");

        manager.shutdown();
        until(|| manager.state() == ConnectionState::Disconnected).await;
        until(|| !bus.has_name(&app_name())).await;
        assert!(matches!(
            manager.wait_registered(Duration::from_millis(50)).await,
            Err(Error::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_bus_events_fire() {
        let bus = MemoryBus::new();
        let events = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.set(Box::new(move |event| sink.lock().push(event.kind())));

        let mut config = ConnectionConfig::new(app_name());
        config.reconnect_initial = Duration::from_millis(10);
        let manager =
            ConnectionManager::new(config, Arc::new(bus.transport()), Arc::new(Echo), events);
        manager.start().expect("start");
        manager.wait_registered(WAIT).await.expect("registered");

        bus.drop_peer(&app_name());
        until(|| seen.lock().len() == 2).await;
        assert_eq!(
            *seen.lock(),
            vec![EventKind::BusLost, EventKind::BusRestored]
        );
    }
}
