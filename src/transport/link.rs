//! Transport seam and the bus handshake.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::BusName;
use crate::protocol::{Message, decode_message, encode_message};

// ============================================================================
// BusLink
// ============================================================================

/// An open, framed, bidirectional link to the bus.
///
/// Each item is one encoded frame. The link is lost when `incoming`
/// yields `None` or a send on `outgoing` fails; dropping `outgoing`
/// closes it.
#[derive(Debug)]
pub struct BusLink {
    /// Frames to the bus.
    pub outgoing: mpsc::UnboundedSender<Vec<u8>>,
    /// Frames from the bus.
    pub incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl BusLink {
    /// Creates a connected pair of links.
    ///
    /// Whatever one side sends, the other receives.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: a_tx,
                incoming: b_rx,
            },
            Self {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }

    /// Encodes and sends a frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if encoding fails
    /// - [`Error::Disconnected`] if the link is closed
    pub fn send(&self, message: &Message) -> Result<()> {
        let bytes = encode_message(message)?;
        self.outgoing.send(bytes).map_err(|_| Error::Disconnected)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Opens links to a bus.
///
/// Implemented by [`WebSocketTransport`](super::WebSocketTransport) and
/// [`MemoryTransport`](super::MemoryTransport). Each call to `open` is a
/// fresh connection; the connection manager calls it again after a loss.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new link.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the bus is unreachable.
    async fn open(&self) -> Result<BusLink>;

    /// Describes the bus address, for logging.
    fn describe(&self) -> String;
}

// ============================================================================
// Handshake
// ============================================================================

/// Joins the bus on a fresh link.
///
/// Sends `Hello` and waits for `Welcome`. Frames arriving before the
/// answer are ignored.
///
/// # Errors
///
/// - [`Error::ConnectionTimeout`] if the bus does not answer in time
/// - [`Error::NameRejected`] if the well-known name is refused
/// - [`Error::Disconnected`] if the link closes first
pub async fn handshake(
    link: &mut BusLink,
    name: Option<&BusName>,
    wait: Duration,
) -> Result<BusName> {
    link.send(&Message::Hello {
        name: name.cloned(),
    })?;

    let answer = async {
        loop {
            let Some(bytes) = link.incoming.recv().await else {
                return Err(Error::Disconnected);
            };
            match decode_message(&bytes)? {
                Message::Welcome { unique_name } => return Ok(unique_name),
                Message::NameError { name, reason } => {
                    return Err(Error::name_rejected(name, reason));
                }
                other => trace!(kind = other.kind(), "Ignoring frame before welcome"),
            }
        }
    };

    let unique_name = timeout(wait, answer)
        .await
        .map_err(|_| Error::connection_timeout(wait.as_millis() as u64))??;

    debug!(%unique_name, "Joined bus");
    Ok(unique_name)
}

// ============================================================================
// Tests
// ============================================================================
