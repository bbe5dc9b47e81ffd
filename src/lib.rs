//! CDP relay - WebSocket bridge between an automation client and a
//! browser-extension debugger.
//!
//! The relay sits between a CDP consumer (an automation client speaking
//! the Chrome DevTools Protocol) and a browser extension that holds the
//! real debugger attachment, multiplexing one extension connection across
//! the consumer's logical sessions.
//!
//! # Architecture
//!
//! - **Consumer end**: dials `/cdp`, issues CDP commands, receives
//!   responses and events
//! - **Extension end**: dials `/extension`, executes debugger operations,
//!   emits forwarded CDP events
//!
//! Key design principles:
//!
//! - One live socket per role; a newcomer replaces its predecessor
//! - A handful of methods are intercepted and answered locally
//!   (`Browser.getVersion`, `Browser.setDownloadBehavior`, top-level
//!   `Target.setAutoAttach`, `Target.getTargetInfo`); everything else is
//!   forwarded verbatim with correlation preserved
//! - Every consumer command gets exactly one well-formed response, even
//!   when forwarding fails
//!
//! # Quick Start
//!
//! ```no_run
//! use cdp_relay::{RelayServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = RelayServer::with_port(9230).await?;
//!
//!     println!("consumer endpoint:  {}", server.consumer_url());
//!     println!("extension endpoint: {}", server.extension_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe id wrappers and the request-id allocator |
//! | [`protocol`] | Wire message types for both peers |
//! | [`relay`] | Relay core: routing, interception, session state |
//! | [`transport`] | WebSocket server and per-peer connections |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for relay entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire message types.
///
/// Discriminated unions per direction, derived from field presence.
pub mod protocol;

/// Relay core: command routing, interception, session state.
pub mod relay;

/// WebSocket transport layer.
///
/// Server shell and per-peer connection wrappers.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Relay types
pub use relay::{ConnectionInfo, Relay};

// Transport types
pub use transport::{CONSUMER_PATH, EXTENSION_PATH, RelayServer};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CommandId, RequestId, RequestIdAllocator, SessionId};

// Protocol types
pub use protocol::{
    CdpError, ConsumerCommand, ConsumerMessage, EventMessage, ExtensionEvent, ExtensionMessage,
    ExtensionReply, ExtensionRequest, ResponseMessage,
};
