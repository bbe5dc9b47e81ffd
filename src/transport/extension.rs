//! Extension-side WebSocket connection and event loop.
//!
//! This module owns the socket to the browser extension, including
//! request/reply correlation and unsolicited event routing.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming messages from the extension (replies, events)
//! - Outgoing requests from the relay core
//! - Request/reply correlation by relay-assigned numeric id
//! - Event handler callbacks
//!
//! The extension side is strict: malformed inbound JSON closes the socket,
//! and an event handler returning an error closes it too. Protocol
//! integrity on this link is assumed essential for correctness of the
//! whole relay, so partial processing is never allowed to leave the
//! correlation state inconsistent.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, RequestIdAllocator, SessionId};
use crate::protocol::{ExtensionEvent, ExtensionMessage, ExtensionRequest};

// ============================================================================
// Types
// ============================================================================

/// Map of pending request ids to reply continuations.
type PendingMap = FxHashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// Event handler callback type.
///
/// Called for each unsolicited event received from the extension. Returning
/// an error is fatal for the connection: the socket is closed and all
/// pending calls are rejected.
pub type ExtensionEventHandler = Box<dyn Fn(ExtensionEvent) -> Result<()> + Send + Sync>;

/// Close handler callback type.
///
/// Invoked exactly once when the connection's event loop terminates, after
/// all pending calls have been rejected.
pub type ExtensionCloseHandler = Box<dyn FnOnce() + Send>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and wait for the correlated reply.
    Send {
        request: ExtensionRequest,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    /// Close the socket, optionally with an explicit close frame.
    Close { frame: Option<CloseFrame> },
}

// ============================================================================
// ExtensionConnection
// ============================================================================

/// WebSocket connection to the browser extension.
///
/// Handles request/reply correlation and event routing. The connection
/// spawns an internal event loop task; cloning yields another handle to the
/// same underlying socket.
///
/// Request ids start at 1 and increment per call for the lifetime of this
/// connection object; a replacement connection gets a fresh id space.
#[derive(Clone)]
pub struct ExtensionConnection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Pending reply continuations (shared with the event loop).
    pending: Arc<Mutex<PendingMap>>,
    /// Request id allocator for this connection instance.
    ids: Arc<RequestIdAllocator>,
}

impl ExtensionConnection {
    /// Creates a new connection from an accepted WebSocket stream.
    ///
    /// Spawns the event loop task internally. `on_event` receives every
    /// unsolicited extension event; `on_close` fires exactly once when the
    /// socket closes, after pending calls have been rejected. Both are
    /// taken at construction so no inbound message can race past an
    /// unregistered handler.
    pub(crate) fn new(
        ws_stream: WebSocketStream<TcpStream>,
        on_event: ExtensionEventHandler,
        on_close: ExtensionCloseHandler,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(PendingMap::default()));

        let pending_clone = Arc::clone(&pending);
        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            pending_clone,
            on_event,
            on_close,
        ));

        Self {
            command_tx,
            pending,
            ids: Arc::new(RequestIdAllocator::new()),
        }
    }

    /// Sends a request to the extension and waits for the correlated reply.
    ///
    /// Resolves with the reply's `result` payload, or rejects with the
    /// extension-reported `error.message`. There is no timeout: a request
    /// the extension never answers stays pending until the socket closes,
    /// at which point it is rejected with "WebSocket closed".
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the socket is not open
    /// - [`Error::Extension`] if the reply carries an `error` field
    pub async fn send(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let mut request = ExtensionRequest::new(self.ids.next(), method);
        request.params = params;
        request.session_id = session_id;

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Returns the number of requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Closes the connection without an explicit close frame.
    pub fn close(&self) {
        let _ = self
            .command_tx
            .send(ConnectionCommand::Close { frame: None });
    }

    /// Closes the connection with a normal-closure frame and the given
    /// reason text.
    pub fn close_with_reason(&self, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        let _ = self
            .command_tx
            .send(ConnectionCommand::Close { frame: Some(frame) });
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WebSocketStream<TcpStream>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        pending: Arc<Mutex<PendingMap>>,
        on_event: ExtensionEventHandler,
        on_close: ExtensionCloseHandler,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming messages from the extension
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = Self::handle_incoming_message(&text, &pending, &on_event) {
                                error!(error = %e, "Fatal extension message, closing socket");
                                let _ = ws_write.close().await;
                                break;
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Extension socket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Extension socket error");
                            break;
                        }

                        None => {
                            debug!("Extension stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Requests from the relay core
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &pending,
                            ).await;
                        }

                        Some(ConnectionCommand::Close { frame }) => {
                            debug!("Close command received");
                            match frame {
                                Some(frame) => {
                                    let _ = ws_write.send(Message::Close(Some(frame))).await;
                                }
                                None => {
                                    let _ = ws_write.close().await;
                                }
                            }
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Reject all pending calls, then notify the owner exactly once.
        Self::fail_pending_requests(&pending);
        on_close();

        debug!("Extension event loop terminated");
    }

    /// Handles an incoming text message from the extension.
    ///
    /// An `Err` return is fatal for the connection.
    fn handle_incoming_message(
        text: &str,
        pending: &Arc<Mutex<PendingMap>>,
        on_event: &ExtensionEventHandler,
    ) -> Result<()> {
        let message: ExtensionMessage = from_str(text)
            .map_err(|e| Error::protocol(format!("Malformed extension message: {e}")))?;

        match message {
            ExtensionMessage::Reply(reply) => {
                let tx = pending.lock().remove(&reply.id);

                match tx {
                    Some(tx) => {
                        let outcome = match reply.error {
                            Some(err) => Err(Error::extension(err.message)),
                            None => Ok(reply.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => {
                        warn!(id = %reply.id, "Reply for unknown request, dropping");
                    }
                }

                Ok(())
            }

            ExtensionMessage::Event(event) => on_event(event),
        }
    }

    /// Handles a send command from the relay core.
    async fn handle_send_command(
        request: ExtensionRequest,
        response_tx: oneshot::Sender<Result<Value>>,
        ws_write: &mut futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
        pending: &Arc<Mutex<PendingMap>>,
    ) {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Register the continuation before sending
        pending.lock().insert(request_id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await
            && let Some(tx) = pending.lock().remove(&request_id)
        {
            let _ = tx.send(Err(Error::connection(e.to_string())));
        }

        trace!(%request_id, "Request sent to extension");
    }

    /// Rejects all pending calls with [`Error::ConnectionClosed`].
    fn fail_pending_requests(pending: &Arc<Mutex<PendingMap>>) {
        let drained: Vec<_> = pending.lock().drain().collect();
        let count = drained.len();

        for (_, tx) in drained {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Rejected pending requests on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
