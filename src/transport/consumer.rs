//! Consumer-side WebSocket connection.
//!
//! This module owns the socket to the automation client (the CDP
//! consumer). Outbound responses/events are enqueued without blocking;
//! inbound commands are parsed and handed to a dispatch callback.
//!
//! Unlike the extension side, the consumer side keeps no correlation state
//! of its own: it relays, it does not originate calls awaiting replies. It
//! is also lenient where the extension side is strict: a malformed inbound
//! message is logged and dropped rather than closing the socket, so one
//! bad consumer message cannot terminate an otherwise-useful session.

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use serde_json::{from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{ConsumerCommand, ConsumerMessage};

// ============================================================================
// Types
// ============================================================================

/// Command dispatch callback type.
///
/// Called for each well-formed command received from the consumer. The
/// callback must not block: long-running handling belongs in a spawned
/// task so the read loop keeps draining the socket.
pub type ConsumerCommandHandler = Box<dyn Fn(ConsumerCommand) + Send + Sync>;

/// Close handler callback type.
///
/// Invoked exactly once when the connection's event loop terminates.
pub type ConsumerCloseHandler = Box<dyn FnOnce() + Send>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Deliver a response or event to the consumer.
    Send(ConsumerMessage),
    /// Close the socket, optionally with an explicit close frame.
    Close { frame: Option<CloseFrame> },
}

// ============================================================================
// ConsumerConnection
// ============================================================================

/// WebSocket connection to the automation client.
///
/// The connection spawns an internal event loop task; cloning yields
/// another handle to the same underlying socket.
#[derive(Clone)]
pub struct ConsumerConnection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl ConsumerConnection {
    /// Creates a new connection from an accepted WebSocket stream.
    ///
    /// Spawns the event loop task internally. `on_command` receives every
    /// well-formed inbound command; `on_close` fires exactly once when the
    /// socket closes.
    pub(crate) fn new(
        ws_stream: WebSocketStream<TcpStream>,
        on_command: ConsumerCommandHandler,
        on_close: ConsumerCloseHandler,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_event_loop(
            ws_stream, command_rx, on_command, on_close,
        ));

        Self { command_tx }
    }

    /// Enqueues a response or event for delivery to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket is no longer open.
    pub fn send(&self, message: ConsumerMessage) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Send(message))
            .map_err(|_| Error::ConnectionClosed)
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
        on_command: ConsumerCommandHandler,
        on_close: ConsumerCloseHandler,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Inbound commands from the consumer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match from_str::<ConsumerCommand>(&text) {
                                Ok(command) => {
                                    trace!(id = %command.id, method = %command.method, "Command received");
                                    on_command(command);
                                }
                                Err(e) => {
                                    // Lenient by contract: drop, never close.
                                    warn!(error = %e, "Malformed consumer message, dropping");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Consumer socket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Consumer socket error");
                            break;
                        }

                        None => {
                            debug!("Consumer stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Outbound responses/events from the relay core
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(message)) => {
                            let json = match to_string(&message) {
                                Ok(j) => j,
                                Err(e) => {
                                    error!(error = %e, "Failed to serialize consumer message");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(error = %e, "Failed to deliver consumer message");
                            }
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

        on_close();

        debug!("Consumer event loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream::{SplitSink, SplitStream};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::MaybeTlsStream;

    use crate::identifiers::CommandId;
    use crate::protocol::ResponseMessage;

    type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
    type ClientWrite = SplitSink<ClientStream, Message>;
    type ClientRead = SplitStream<ClientStream>;

    async fn socket_pair() -> (WebSocketStream<TcpStream>, ClientWrite, ClientRead) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let client_task =
            tokio::spawn(
                async move { tokio_tungstenite::connect_async(format!("ws://{addr}")).await },
            );

        let (stream, _) = listener.accept().await.expect("accept");
        let server_ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");

        let (client_ws, _) = client_task.await.expect("join").expect("connect");
        let (client_write, client_read) = client_ws.split();

        (server_ws, client_write, client_read)
    }

    #[tokio::test]
    async fn test_command_dispatched_to_handler() {
        let (server_ws, mut client_write, _client_read) = socket_pair().await;
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let _connection = ConsumerConnection::new(
            server_ws,
            Box::new(move |command| {
                let _ = command_tx.send(command);
            }),
            Box::new(|| {}),
        );

        client_write
            .send(Message::Text(
                json!({ "id": 7, "method": "Browser.getVersion" }).to_string().into(),
            ))
            .await
            .expect("send");

        let command = command_rx.recv().await.expect("command");
        assert_eq!(command.id, CommandId::new(7));
        assert_eq!(command.method, "Browser.getVersion");
    }

    #[tokio::test]
    async fn test_malformed_json_is_dropped_not_fatal() {
        let (server_ws, mut client_write, _client_read) = socket_pair().await;
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let _connection = ConsumerConnection::new(
            server_ws,
            Box::new(move |command| {
                let _ = command_tx.send(command);
            }),
            Box::new(|| {}),
        );

        client_write
            .send(Message::Text("{ nope".into()))
            .await
            .expect("send garbage");

        // The socket must survive: a following valid command still arrives.
        client_write
            .send(Message::Text(
                json!({ "id": 8, "method": "Page.enable" }).to_string().into(),
            ))
            .await
            .expect("send");

        let command = command_rx.recv().await.expect("command");
        assert_eq!(command.id, CommandId::new(8));
    }

    #[tokio::test]
    async fn test_send_delivers_to_client() {
        let (server_ws, _client_write, mut client_read) = socket_pair().await;
        let connection = ConsumerConnection::new(server_ws, Box::new(|_| {}), Box::new(|| {}));

        connection
            .send(ResponseMessage::ack(CommandId::new(5), None).into())
            .expect("enqueue");

        loop {
            match client_read.next().await.expect("open").expect("read") {
                Message::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                    assert_eq!(value, json!({ "id": 5 }));
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_close_with_reason_sends_frame() {
        let (server_ws, _client_write, mut client_read) = socket_pair().await;
        let connection = ConsumerConnection::new(server_ws, Box::new(|_| {}), Box::new(|| {}));

        connection.close_with_reason("New connection established");

        loop {
            match client_read.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(frame.code, CloseCode::Normal);
                    assert_eq!(frame.reason.as_str(), "New connection established");
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_close_handler_fires_once_on_disconnect() {
        let (server_ws, client_write, client_read) = socket_pair().await;
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_clone = Arc::clone(&closed);
        let connection = ConsumerConnection::new(
            server_ws,
            Box::new(|_| {}),
            Box::new(move || {
                closed_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        drop(client_write);
        drop(client_read);

        // Sending into a closed loop eventually errors once the loop exits.
        let mut attempts = 0;
        while connection
            .send(ResponseMessage::ack(CommandId::new(1), None).into())
            .is_ok()
        {
            attempts += 1;
            assert!(attempts < 100, "loop never observed the disconnect");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
