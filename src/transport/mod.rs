//! WebSocket transport layer.
//!
//! This module owns the sockets on both sides of the relay and the server
//! shell that accepts them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                    ┌──────────────────┐
//! │    Automation    │   WebSocket /cdp   │                  │
//! │      client      │◄──────────────────►│ ConsumerConn.    │
//! └──────────────────┘                    │                  │
//!                                         │   RelayServer    │
//! ┌──────────────────┐  WS /extension     │                  │
//! │     Browser      │◄──────────────────►│ ExtensionConn.   │
//! │    extension     │                    │                  │
//! └──────────────────┘                    └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `RelayServer::bind` - Bind the listener, spawn the accept loop
//! 2. Peers dial their role's path and are upgraded
//! 3. The relay core adopts each socket, closing any predecessor of the
//!    same role
//! 4. Connection event loops run until the socket closes or the server
//!    shuts down
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `consumer` | Consumer-side socket: outbound queue, inbound dispatch |
//! | `extension` | Extension-side socket: correlation map and event loop |
//! | `server` | Listener, upgrade routing, ws-URL formatting |

// ============================================================================
// Submodules
// ============================================================================

/// Consumer-side WebSocket connection.
pub mod consumer;

/// Extension-side WebSocket connection and correlation.
pub mod extension;

/// WebSocket server shell.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use consumer::{ConsumerCloseHandler, ConsumerCommandHandler, ConsumerConnection};
pub use extension::{ExtensionCloseHandler, ExtensionConnection, ExtensionEventHandler};
pub use server::{CONSUMER_PATH, EXTENSION_PATH, RelayServer};
