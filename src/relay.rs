//! Relay core: command routing, interception, and session state.
//!
//! The relay owns one connection slot per peer role and the cached
//! attachment descriptor for the single live debugger session. All state
//! lives in fields of one [`Relay`] instance constructed once per process;
//! there are no ambient globals.
//!
//! # Routing
//!
//! Inbound consumer commands are handled in order:
//!
//! 1. No extension connected → immediate error response, nothing is
//!    forwarded or left hanging.
//! 2. The interception table answers a handful of methods locally
//!    (`Browser.getVersion`, `Browser.setDownloadBehavior`, top-level
//!    `Target.setAutoAttach`, `Target.getTargetInfo`).
//! 3. Everything else is forwarded verbatim to the extension and the
//!    resolved result or rejection is translated into a response carrying
//!    the command's own `id` and `sessionId`.
//!
//! # Session lifecycle
//!
//! Detached → Attaching (attach request in flight) → Attached
//! (ConnectionInfo populated) → Detached. The session ends when the
//! extension reports `detachedFromTab`, when the extension socket closes,
//! or when the consumer disconnects (which also sends the extension an
//! explicit `detachFromTab` request). There is exactly one live session at
//! a time; re-attachment is the consumer's responsibility.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId};
use crate::protocol::{
    ConsumerCommand, ConsumerMessage, EventMessage, ExtensionEvent, ParsedExtensionEvent,
    ResponseMessage,
};
use crate::transport::{ConsumerConnection, ExtensionConnection};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version reported by the intercepted `Browser.getVersion`.
const PROTOCOL_VERSION: &str = "1.3";

/// Product string identifying this endpoint as a bridge, not a browser.
const BRIDGE_PRODUCT: &str = "Chrome/Extension-Bridge";

/// User-agent string reported by the intercepted `Browser.getVersion`.
const BRIDGE_USER_AGENT: &str = "CDP-Relay-Bridge/0.1.0";

/// Close reason used when a newcomer replaces a live socket of its role.
const REPLACED_REASON: &str = "New connection established";

// ============================================================================
// ConnectionInfo
// ============================================================================

/// Cached attachment descriptor for the one live debugger session.
///
/// Created when the consumer's auto-attach is confirmed by the extension;
/// destroyed on extension detach report, extension disconnect, or consumer
/// disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Opaque CDP target descriptor returned by the extension.
    pub target_info: Value,
    /// Session identifier assigned by the extension.
    pub session_id: SessionId,
}

// ============================================================================
// Connection Slots
// ============================================================================

/// Live extension socket plus the generation that identifies it.
struct ExtensionSlot {
    connection: ExtensionConnection,
    generation: u64,
}

/// Live consumer socket plus the generation that identifies it.
struct ConsumerSlot {
    connection: ConsumerConnection,
    generation: u64,
}

// ============================================================================
// Relay
// ============================================================================

/// The relay core.
///
/// Owns both peer connection slots and the session state; cloning yields
/// another handle to the same core.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

/// Shared relay state.
struct RelayInner {
    /// Live extension socket, if any.
    extension: Mutex<Option<ExtensionSlot>>,
    /// Live consumer socket, if any.
    consumer: Mutex<Option<ConsumerSlot>>,
    /// Cached attachment for the one live session.
    connection_info: Mutex<Option<ConnectionInfo>>,
    /// Generation counter distinguishing successive sockets per role.
    generations: AtomicU64,
}

impl Relay {
    /// Creates a relay with no connected peers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                extension: Mutex::new(None),
                consumer: Mutex::new(None),
                connection_info: Mutex::new(None),
                generations: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the cached attachment descriptor, if a session is live.
    #[must_use]
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.connection_info.lock().clone()
    }

    /// Returns `true` if an extension socket is live.
    #[must_use]
    pub fn has_extension(&self) -> bool {
        self.inner.extension.lock().is_some()
    }

    /// Returns `true` if a consumer socket is live.
    #[must_use]
    pub fn has_consumer(&self) -> bool {
        self.inner.consumer.lock().is_some()
    }

    /// Adopts a newly-upgraded consumer socket as the live consumer.
    ///
    /// A previous consumer, if any, is closed first with reason
    /// "New connection established".
    pub(crate) fn accept_consumer(&self, ws_stream: WebSocketStream<TcpStream>) {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

        let dispatch = Arc::downgrade(&self.inner);
        let on_command = Box::new(move |command: ConsumerCommand| {
            if let Some(inner) = dispatch.upgrade() {
                // One task per command: a slow forward must not block the
                // read loop, and concurrent commands are correlated
                // independently by relay-assigned extension ids.
                tokio::spawn(RelayInner::handle_command(inner, command));
            }
        });

        let teardown = Arc::downgrade(&self.inner);
        let on_close = Box::new(move || {
            if let Some(inner) = teardown.upgrade() {
                inner.consumer_closed(generation);
            }
        });

        let connection = ConsumerConnection::new(ws_stream, on_command, on_close);

        let mut slot = self.inner.consumer.lock();
        if let Some(previous) = slot.take() {
            info!("Replacing live consumer connection");
            previous.connection.close_with_reason(REPLACED_REASON);
        }
        *slot = Some(ConsumerSlot {
            connection,
            generation,
        });
        drop(slot);

        info!("Consumer connected");
    }

    /// Adopts a newly-upgraded extension socket as the live extension.
    ///
    /// A previous extension, if any, is closed first with reason
    /// "New connection established"; any session attached through it is
    /// forgotten.
    pub(crate) fn accept_extension(&self, ws_stream: WebSocketStream<TcpStream>) {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

        let dispatch = Arc::downgrade(&self.inner);
        let on_event = Box::new(move |event: ExtensionEvent| match dispatch.upgrade() {
            Some(inner) => inner.handle_extension_event(event),
            None => Ok(()),
        });

        let teardown = Arc::downgrade(&self.inner);
        let on_close = Box::new(move || {
            if let Some(inner) = teardown.upgrade() {
                inner.extension_closed(generation);
            }
        });

        let connection = ExtensionConnection::new(ws_stream, on_event, on_close);

        let mut slot = self.inner.extension.lock();
        if let Some(previous) = slot.take() {
            info!("Replacing live extension connection");
            previous.connection.close_with_reason(REPLACED_REASON);
            self.inner.clear_connection_info("extension replaced");
        }
        *slot = Some(ExtensionSlot {
            connection,
            generation,
        });
        drop(slot);

        info!("Extension connected");
    }

    /// Closes both peer sockets and forgets the session.
    pub(crate) fn shutdown(&self) {
        if let Some(slot) = self.inner.consumer.lock().take() {
            slot.connection.close_with_reason("Server shutting down");
        }
        if let Some(slot) = self.inner.extension.lock().take() {
            slot.connection.close_with_reason("Server shutting down");
        }
        self.inner.clear_connection_info("server shutdown");
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RelayInner - Command Routing
// ============================================================================

impl RelayInner {
    /// Routes one consumer command to interception or forwarding and emits
    /// the response.
    async fn handle_command(self: Arc<Self>, command: ConsumerCommand) {
        let id = command.id;
        let session_id = command.session_id.clone();

        // No extension, no forwarding: answer immediately rather than hang.
        let Some(extension) = self.current_extension() else {
            self.send_to_consumer(
                ResponseMessage::error(id, session_id, Error::ExtensionNotConnected.to_string())
                    .into(),
            );
            return;
        };

        let response = match self.intercept(&extension, &command).await {
            Some(response) => response,
            None => {
                // Plain forwarding: same id, same sessionId, and any
                // rejection becomes a well-formed error response.
                match extension
                    .send(
                        command.method.clone(),
                        command.params.clone(),
                        command.session_id.clone(),
                    )
                    .await
                {
                    Ok(result) => ResponseMessage::result(id, session_id, result),
                    Err(e) => ResponseMessage::error(id, session_id, e.to_string()),
                }
            }
        };

        self.send_to_consumer(response.into());
    }

    /// The interception table: methods answered locally, never forwarded.
    ///
    /// Returns `None` when the command should fall through to forwarding.
    async fn intercept(
        &self,
        extension: &ExtensionConnection,
        command: &ConsumerCommand,
    ) -> Option<ResponseMessage> {
        let id = command.id;
        let session_id = command.session_id.clone();

        match command.method.as_str() {
            // Let the consumer believe it is talking to a real browser
            // without a round trip to the extension.
            "Browser.getVersion" => Some(ResponseMessage::result(
                id,
                session_id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "product": BRIDGE_PRODUCT,
                    "userAgent": BRIDGE_USER_AGENT,
                }),
            )),

            // Not controllable through the extension debugger surface.
            "Browser.setDownloadBehavior" => {
                Some(ResponseMessage::result(id, session_id, json!({})))
            }

            // Top-level auto-attach drives the real attachment; a
            // session-scoped one targets a sub-target and forwards as-is.
            "Target.setAutoAttach" if command.session_id.is_none() => {
                Some(self.attach_to_tab(extension, id).await)
            }

            // Served from cache; after a detach there is no result, but
            // never an error.
            "Target.getTargetInfo" => {
                let cached = self
                    .connection_info
                    .lock()
                    .as_ref()
                    .map(|info| info.target_info.clone());
                Some(match cached {
                    Some(target_info) => ResponseMessage::result(
                        id,
                        session_id,
                        json!({ "targetInfo": target_info }),
                    ),
                    None => ResponseMessage::ack(id, session_id),
                })
            }

            _ => None,
        }
    }

    /// Performs the top-level attach handshake.
    ///
    /// On success the synthetic `Target.attachedToTarget` event is emitted
    /// before the acknowledgement for the original command id.
    async fn attach_to_tab(
        &self,
        extension: &ExtensionConnection,
        id: CommandId,
    ) -> ResponseMessage {
        let reply = match extension.send("attachToTab", None, None).await {
            Ok(reply) => reply,
            Err(e) => return ResponseMessage::error(id, None, e.to_string()),
        };

        let info = match Self::parse_attach_reply(reply) {
            Ok(info) => info,
            Err(e) => return ResponseMessage::error(id, None, e.to_string()),
        };

        *self.connection_info.lock() = Some(info.clone());
        info!(session_id = %info.session_id, "Attached to tab");

        let mut target_info = info.target_info;
        if let Value::Object(ref mut fields) = target_info {
            fields.insert("attached".to_string(), Value::Bool(true));
        }

        self.send_to_consumer(
            EventMessage::new(
                "Target.attachedToTarget",
                None,
                Some(json!({
                    "sessionId": info.session_id,
                    "targetInfo": target_info,
                    "waitingForDebugger": false,
                })),
            )
            .into(),
        );

        ResponseMessage::ack(id, None)
    }

    /// Extracts the attachment descriptor from an `attachToTab` reply.
    fn parse_attach_reply(reply: Value) -> Result<ConnectionInfo> {
        let session_id = reply
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("attachToTab reply missing sessionId"))?
            .to_string();

        let target_info = reply
            .get("targetInfo")
            .cloned()
            .ok_or_else(|| Error::protocol("attachToTab reply missing targetInfo"))?;

        Ok(ConnectionInfo {
            target_info,
            session_id: SessionId::from(session_id),
        })
    }
}

// ============================================================================
// RelayInner - Extension Events
// ============================================================================

impl RelayInner {
    /// Handles one unsolicited extension event.
    ///
    /// An `Err` return closes the extension socket (handler errors are
    /// protocol-fatal for that connection).
    fn handle_extension_event(&self, event: ExtensionEvent) -> Result<()> {
        match event.parse()? {
            // Pure passthrough preserving session scoping; no `id` is ever
            // attached to an event.
            ParsedExtensionEvent::ForwardedCdpEvent(forwarded) => {
                self.send_to_consumer(
                    EventMessage::new(forwarded.method, forwarded.session_id, forwarded.params)
                        .into(),
                );
                Ok(())
            }

            // Losing the debugger attachment invalidates the whole relay
            // session, not just one command.
            ParsedExtensionEvent::DetachedFromTab { .. } => {
                info!("Extension reported detach, tearing down session");
                self.clear_connection_info("detached from tab");
                let extension = self
                    .extension
                    .lock()
                    .as_ref()
                    .map(|slot| slot.connection.clone());
                if let Some(extension) = extension {
                    extension.close();
                }
                Ok(())
            }

            ParsedExtensionEvent::Unknown { method, .. } => {
                debug!(method = %method, "Ignoring unrecognized extension event");
                Ok(())
            }
        }
    }
}

// ============================================================================
// RelayInner - Lifecycle
// ============================================================================

impl RelayInner {
    /// Returns a handle to the live extension socket, if any.
    fn current_extension(&self) -> Option<ExtensionConnection> {
        self.extension
            .lock()
            .as_ref()
            .map(|slot| slot.connection.clone())
    }

    /// Delivers a message to the live consumer, if any.
    fn send_to_consumer(&self, message: ConsumerMessage) {
        let consumer = self
            .consumer
            .lock()
            .as_ref()
            .map(|slot| slot.connection.clone());

        match consumer {
            Some(consumer) => {
                if let Err(e) = consumer.send(message) {
                    debug!(error = %e, "Consumer delivery failed");
                }
            }
            None => debug!("No consumer connected, dropping outbound message"),
        }
    }

    /// Forgets the cached attachment, if any.
    fn clear_connection_info(&self, reason: &str) {
        if self.connection_info.lock().take().is_some() {
            debug!(reason, "Connection info cleared");
        }
    }

    /// Called when an extension socket's event loop terminates.
    fn extension_closed(&self, generation: u64) {
        let was_live = {
            let mut slot = self.extension.lock();
            match slot.as_ref() {
                Some(current) if current.generation == generation => {
                    *slot = None;
                    true
                }
                // A replaced connection winding down; the live slot is newer.
                _ => false,
            }
        };

        if was_live {
            info!("Extension disconnected");
            self.clear_connection_info("extension disconnected");
        }
    }

    /// Called when a consumer socket's event loop terminates.
    fn consumer_closed(&self, generation: u64) {
        let was_live = {
            let mut slot = self.consumer.lock();
            match slot.as_ref() {
                Some(current) if current.generation == generation => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };

        if !was_live {
            return;
        }

        info!("Consumer disconnected");
        self.clear_connection_info("consumer disconnected");

        // The consumer is already gone, so the detach request's outcome is
        // logged, never surfaced.
        let extension = self
            .extension
            .lock()
            .as_ref()
            .map(|slot| slot.connection.clone());
        if let Some(extension) = extension {
            tokio::spawn(async move {
                if let Err(e) = extension.send("detachFromTab", None, None).await {
                    debug!(error = %e, "Detach request after consumer disconnect failed");
                }
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::MaybeTlsStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

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

    /// Connects a consumer client to the relay.
    async fn connect_consumer(relay: &Relay) -> (ClientWrite, ClientRead) {
        let (server_ws, client_write, client_read) = socket_pair().await;
        relay.accept_consumer(server_ws);
        (client_write, client_read)
    }

    /// Connects an extension client to the relay.
    async fn connect_extension(relay: &Relay) -> (ClientWrite, ClientRead) {
        let (server_ws, client_write, client_read) = socket_pair().await;
        relay.accept_extension(server_ws);
        (client_write, client_read)
    }

    async fn send_json(write: &mut ClientWrite, value: Value) {
        write
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send");
    }

    async fn recv_json(read: &mut ClientRead) -> Value {
        loop {
            match read.next().await.expect("open").expect("read") {
                Message::Text(text) => return serde_json::from_str(&text).expect("json"),
                _ => continue,
            }
        }
    }

    /// Drives the fake extension through one attach handshake.
    async fn serve_attach(write: &mut ClientWrite, read: &mut ClientRead, session_id: &str) {
        let request = recv_json(read).await;
        assert_eq!(request["method"], "attachToTab");
        send_json(
            write,
            json!({
                "id": request["id"],
                "result": {
                    "sessionId": session_id,
                    "targetInfo": { "targetId": "T1", "type": "page", "url": "about:blank" }
                }
            }),
        )
        .await;
    }

    #[tokio::test]
    async fn test_no_extension_guard() {
        let relay = Relay::new();
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        send_json(
            &mut consumer_write,
            json!({ "id": 1, "method": "Page.enable" }),
        )
        .await;

        let response = recv_json(&mut consumer_read).await;
        assert_eq!(
            response,
            json!({ "id": 1, "error": { "message": "Extension not connected" } })
        );
    }

    #[tokio::test]
    async fn test_attach_round_trip_event_then_ack() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        let fake = tokio::spawn(async move {
            serve_attach(&mut ext_write, &mut ext_read, "S1").await;
            (ext_write, ext_read)
        });

        send_json(
            &mut consumer_write,
            json!({ "id": 7, "method": "Target.setAutoAttach", "params": { "autoAttach": true } }),
        )
        .await;

        let event = recv_json(&mut consumer_read).await;
        assert_eq!(event["method"], "Target.attachedToTarget");
        assert!(event.get("id").is_none());
        assert_eq!(event["params"]["sessionId"], "S1");
        assert_eq!(event["params"]["targetInfo"]["attached"], true);
        assert_eq!(event["params"]["waitingForDebugger"], false);

        let ack = recv_json(&mut consumer_read).await;
        assert_eq!(ack, json!({ "id": 7 }));

        assert_eq!(
            relay.connection_info().expect("attached").session_id,
            SessionId::from("S1")
        );
        let _ = fake.await.expect("fake");
    }

    #[tokio::test]
    async fn test_interception_never_reaches_extension() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        send_json(
            &mut consumer_write,
            json!({ "id": 1, "method": "Browser.getVersion" }),
        )
        .await;
        let version = recv_json(&mut consumer_read).await;
        assert_eq!(version["id"], 1);
        assert_eq!(version["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(version["result"]["product"], BRIDGE_PRODUCT);

        send_json(
            &mut consumer_write,
            json!({ "id": 2, "method": "Browser.setDownloadBehavior", "params": { "behavior": "deny" } }),
        )
        .await;
        let ack = recv_json(&mut consumer_read).await;
        assert_eq!(ack, json!({ "id": 2, "result": {} }));

        // The first thing the extension sees is the genuinely forwarded
        // method, proving the intercepted ones never reached it.
        send_json(
            &mut consumer_write,
            json!({ "id": 3, "method": "Network.enable" }),
        )
        .await;
        let forwarded = recv_json(&mut ext_read).await;
        assert_eq!(forwarded["method"], "Network.enable");

        send_json(&mut ext_write, json!({ "id": forwarded["id"], "result": {} })).await;
        let response = recv_json(&mut consumer_read).await;
        assert_eq!(response, json!({ "id": 3, "result": {} }));
    }

    #[tokio::test]
    async fn test_session_scoped_auto_attach_is_forwarded() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        send_json(
            &mut consumer_write,
            json!({
                "id": 4,
                "sessionId": "S1",
                "method": "Target.setAutoAttach",
                "params": { "autoAttach": true }
            }),
        )
        .await;

        let forwarded = recv_json(&mut ext_read).await;
        assert_eq!(forwarded["method"], "Target.setAutoAttach");
        assert_eq!(forwarded["sessionId"], "S1");

        send_json(&mut ext_write, json!({ "id": forwarded["id"], "result": {} })).await;
        let response = recv_json(&mut consumer_read).await;
        assert_eq!(response, json!({ "id": 4, "sessionId": "S1", "result": {} }));
    }

    #[tokio::test]
    async fn test_forwarding_error_translation() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        send_json(
            &mut consumer_write,
            json!({ "id": 5, "method": "Page.navigate", "params": { "url": "x" } }),
        )
        .await;

        let forwarded = recv_json(&mut ext_read).await;
        send_json(
            &mut ext_write,
            json!({ "id": forwarded["id"], "error": { "message": "tab went away" } }),
        )
        .await;

        let response = recv_json(&mut consumer_read).await;
        assert_eq!(
            response,
            json!({ "id": 5, "error": { "message": "tab went away" } })
        );
    }

    #[tokio::test]
    async fn test_event_passthrough_has_no_id() {
        let relay = Relay::new();
        let (mut ext_write, _ext_read) = connect_extension(&relay).await;
        let (_consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        send_json(
            &mut ext_write,
            json!({
                "method": "forwardCDPEvent",
                "params": {
                    "sessionId": "S1",
                    "method": "Network.requestWillBeSent",
                    "params": { "requestId": "42" }
                }
            }),
        )
        .await;

        let event = recv_json(&mut consumer_read).await;
        assert_eq!(
            event,
            json!({
                "sessionId": "S1",
                "method": "Network.requestWillBeSent",
                "params": { "requestId": "42" }
            })
        );
    }

    #[tokio::test]
    async fn test_detach_cascade_clears_target_info() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        let fake = tokio::spawn(async move {
            serve_attach(&mut ext_write, &mut ext_read, "S1").await;
            (ext_write, ext_read)
        });
        send_json(
            &mut consumer_write,
            json!({ "id": 1, "method": "Target.setAutoAttach" }),
        )
        .await;
        let _event = recv_json(&mut consumer_read).await;
        let _ack = recv_json(&mut consumer_read).await;
        let (mut ext_write, mut ext_read) = fake.await.expect("fake");

        // The detach report tears the session down and closes the
        // extension socket.
        send_json(&mut ext_write, json!({ "method": "detachedFromTab", "params": {} })).await;
        loop {
            match ext_read.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
        assert!(relay.connection_info().is_none());

        // Before any re-attach, a fresh extension plus Target.getTargetInfo
        // yields a response with no result and no error.
        let (_ext_write, _ext_read) = connect_extension(&relay).await;
        send_json(
            &mut consumer_write,
            json!({ "id": 2, "method": "Target.getTargetInfo" }),
        )
        .await;
        let response = recv_json(&mut consumer_read).await;
        assert_eq!(response, json!({ "id": 2 }));
    }

    #[tokio::test]
    async fn test_get_target_info_served_from_cache() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        let fake = tokio::spawn(async move {
            serve_attach(&mut ext_write, &mut ext_read, "S1").await;
            // Anything arriving after the attach would be an unexpected
            // forward; surface it for the assertion below.
            let next = recv_json(&mut ext_read).await;
            panic!("unexpected forward to extension: {next}");
        });

        send_json(
            &mut consumer_write,
            json!({ "id": 1, "method": "Target.setAutoAttach" }),
        )
        .await;
        let _event = recv_json(&mut consumer_read).await;
        let _ack = recv_json(&mut consumer_read).await;

        send_json(
            &mut consumer_write,
            json!({ "id": 2, "method": "Target.getTargetInfo" }),
        )
        .await;
        let response = recv_json(&mut consumer_read).await;
        assert_eq!(response["id"], 2);
        assert_eq!(response["result"]["targetInfo"]["targetId"], "T1");

        fake.abort();
    }

    #[tokio::test]
    async fn test_second_consumer_replaces_first() {
        let relay = Relay::new();
        let (_first_write, mut first_read) = connect_consumer(&relay).await;
        let (_second_write, _second_read) = connect_consumer(&relay).await;

        loop {
            match first_read.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(frame.code, CloseCode::Normal);
                    assert_eq!(frame.reason.as_str(), "New connection established");
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
        assert!(relay.has_consumer());
    }

    #[tokio::test]
    async fn test_second_extension_replaces_first() {
        let relay = Relay::new();
        let (_first_write, mut first_read) = connect_extension(&relay).await;
        let (_second_write, _second_read) = connect_extension(&relay).await;

        loop {
            match first_read.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(frame.reason.as_str(), "New connection established");
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
        assert!(relay.has_extension());
    }

    #[tokio::test]
    async fn test_consumer_disconnect_requests_detach() {
        let relay = Relay::new();
        let (mut ext_write, mut ext_read) = connect_extension(&relay).await;
        let (mut consumer_write, mut consumer_read) = connect_consumer(&relay).await;

        let fake = tokio::spawn(async move {
            serve_attach(&mut ext_write, &mut ext_read, "S1").await;
            // The consumer disconnect must produce a detach request.
            let request = recv_json(&mut ext_read).await;
            assert_eq!(request["method"], "detachFromTab");
            send_json(&mut ext_write, json!({ "id": request["id"], "result": {} })).await;
        });

        send_json(
            &mut consumer_write,
            json!({ "id": 1, "method": "Target.setAutoAttach" }),
        )
        .await;
        let _event = recv_json(&mut consumer_read).await;
        let _ack = recv_json(&mut consumer_read).await;

        drop(consumer_write);
        drop(consumer_read);

        fake.await.expect("fake");
        assert!(relay.connection_info().is_none());
    }
}
