//! WebSocket server shell for the relay.
//!
//! One HTTP listener, two WebSocket upgrade paths, one per peer role:
//!
//! ```text
//! ┌────────────────┐        /cdp         ┌─────────────┐      /extension      ┌───────────────┐
//! │   Automation   │◄───────────────────►│ RelayServer │◄────────────────────►│   Browser     │
//! │ client (CDP)   │                     │   → Relay   │                      │   extension   │
//! └────────────────┘                     └─────────────┘                      └───────────────┘
//! ```
//!
//! The shell's only job is to upgrade sockets and hand them to the relay
//! core by role. Any other path is closed with code 4004 and reason
//! "Invalid path". No auth, no TLS termination.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::relay::Relay;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Upgrade path served to the automation client.
pub const CONSUMER_PATH: &str = "/cdp";

/// Upgrade path served to the browser extension.
pub const EXTENSION_PATH: &str = "/extension";

/// Close code for sockets arriving on an unknown path.
const INVALID_PATH_CODE: u16 = 4004;

// ============================================================================
// RelayServer
// ============================================================================

/// HTTP server dispatching WebSocket upgrades to the relay core.
///
/// # Example
///
/// ```ignore
/// let server = RelayServer::new().await?;
/// println!("consumer:  {}", server.consumer_url());
/// println!("extension: {}", server.extension_url());
/// ```
pub struct RelayServer {
    /// The relay core owning both peer connections.
    relay: Relay,

    /// Bound socket address.
    local_addr: SocketAddr,

    /// Shutdown flag checked by the accept loop.
    shutdown: AtomicBool,
}

// ============================================================================
// RelayServer - Constructors
// ============================================================================

impl RelayServer {
    /// Creates a server on localhost with a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn new() -> Result<Arc<Self>> {
        Self::bind(DEFAULT_BIND_IP, 0).await
    }

    /// Creates a server on localhost with a specific port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn with_port(port: u16) -> Result<Arc<Self>> {
        Self::bind(DEFAULT_BIND_IP, port).await
    }

    /// Creates a server bound to a specific IP and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            relay: Relay::new(),
            local_addr,
            shutdown: AtomicBool::new(false),
        });

        let server_clone = Arc::clone(&server);
        tokio::spawn(async move {
            server_clone.accept_loop(listener).await;
        });

        info!(
            consumer = %server.consumer_url(),
            extension = %server.extension_url(),
            "Relay server listening"
        );

        Ok(server)
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Returns the bound socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the relay core.
    #[inline]
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Returns the WebSocket URL the automation client should dial.
    ///
    /// Format: `ws://{addr}/cdp`
    #[inline]
    #[must_use]
    pub fn consumer_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, CONSUMER_PATH)
    }

    /// Returns the WebSocket URL the browser extension should dial.
    ///
    /// Format: `ws://{addr}/extension`
    #[inline]
    #[must_use]
    pub fn extension_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, EXTENSION_PATH)
    }

    /// Stops the accept loop and tears down both live connections.
    pub fn shutdown(&self) {
        info!("Relay server shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        self.relay.shutdown();
    }
}

// ============================================================================
// RelayServer - Accept Loop
// ============================================================================

impl RelayServer {
    /// Background task that accepts and dispatches sockets.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout so the shutdown flag is re-checked.
            match timeout(Duration::from_millis(100), listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => {
                    continue;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades a single socket and routes it by request path.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let mut path = None;
        let callback = |request: &UpgradeRequest,
                        response: UpgradeResponse|
         -> std::result::Result<UpgradeResponse, ErrorResponse> {
            path = Some(request.uri().path().to_string());
            Ok(response)
        };

        let mut ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let path = path.unwrap_or_default();
        match path.as_str() {
            CONSUMER_PATH => {
                debug!(?addr, "Consumer socket accepted");
                self.relay.accept_consumer(ws_stream);
            }

            EXTENSION_PATH => {
                debug!(?addr, "Extension socket accepted");
                self.relay.accept_extension(ws_stream);
            }

            other => {
                warn!(path = other, ?addr, "Rejecting socket on invalid path");
                let frame = CloseFrame {
                    code: CloseCode::Library(INVALID_PATH_CODE),
                    reason: "Invalid path".into(),
                };
                let _ = ws_stream.close(Some(frame)).await;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
