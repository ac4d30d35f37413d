//! WebSocket transport.
//!
//! Connects to a bus daemon at a `ws://` or `wss://` URL. Each bus frame
//! travels as one text message.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace};
use url::Url;

use crate::error::{Error, Result};

use super::link::{BusLink, Transport};

// ============================================================================
// WebSocketTransport
// ============================================================================

/// [`Transport`] over a WebSocket connection.
///
/// # Example
///
/// ```ignore
/// let transport = WebSocketTransport::new("ws://127.0.0.1:7000")?;
/// let (bridge, owner) = Bridge::builder()
///     .identity("org.example.App")
///     .transport(transport)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    /// Creates a transport for the given bus URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or is not a
    /// WebSocket URL.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("invalid bus URL {url:?}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(Error::config(format!("unsupported bus URL scheme {other:?}"))),
        }
    }

    /// Returns the bus URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<BusLink> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", self.url)))?;
        debug!(url = %self.url, "WebSocket connected");

        let (ours, theirs) = BusLink::pair();
        let BusLink {
            outgoing: to_caller,
            incoming: mut from_caller,
        } = theirs;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = ws_read.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                if to_caller.send(text.as_bytes().to_vec()).is_err() {
                                    break;
                                }
                            }

                            Some(Ok(Message::Binary(data))) => {
                                if to_caller.send(data.to_vec()).is_err() {
                                    break;
                                }
                            }

                            Some(Ok(Message::Close(_))) => {
                                debug!("WebSocket closed by bus");
                                break;
                            }

                            Some(Err(e)) => {
                                error!(error = %e, "WebSocket error");
                                break;
                            }

                            None => {
                                debug!("WebSocket stream ended");
                                break;
                            }

                            // Ping/Pong are answered by tungstenite
                            _ => {}
                        }
                    }

                    frame = from_caller.recv() => {
                        match frame {
                            Some(bytes) => {
                                let text = String::from_utf8_lossy(&bytes).into_owned();
                                if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                    debug!(error = %e, "WebSocket send failed");
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_write.close().await;
                                break;
                            }
                        }
                    }
                }
            }
            trace!("WebSocket pump terminated");
        });

        Ok(ours)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
