//! Error types for the CDP relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cdp_relay::{Result, Error};
//!
//! async fn example(ext: &ExtensionConnection) -> Result<()> {
//!     let result = ext.send("attachToTab", None, None).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::ExtensionNotConnected`] |
//! | Protocol | [`Error::Protocol`], [`Error::Extension`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! Several display strings double as wire text: the relay copies
//! [`Error::ConnectionClosed`] and [`Error::ExtensionNotConnected`]
//! renderings verbatim into consumer-facing CDP error responses.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when a socket cannot be established or a send fails.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed.
    ///
    /// Returned to every pending extension call when the extension socket
    /// closes or errors before a matching reply arrives.
    #[error("WebSocket closed")]
    ConnectionClosed,

    /// No extension peer is connected to the relay.
    ///
    /// Returned (and echoed to the consumer) when a command arrives while
    /// the extension socket slot is empty.
    #[error("Extension not connected")]
    ExtensionNotConnected,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message shape.
    ///
    /// Returned when a wire message is structurally valid JSON but does not
    /// carry the fields the relay requires.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error reported by the extension in a reply envelope.
    ///
    /// Carries the extension's own `error.message` verbatim so it can be
    /// surfaced to the consumer unchanged.
    #[error("{message}")]
    Extension {
        /// The extension-reported error message.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an extension-reported error.
    #[inline]
    pub fn extension(message: impl Into<String>) -> Self {
        Self::Extension {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::ExtensionNotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error originated at the extension peer.
    #[inline]
    #[must_use]
    pub fn is_extension_error(&self) -> bool {
        matches!(self, Self::Extension { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_wire_text_displays() {
        // These renderings are copied verbatim into consumer responses.
        assert_eq!(Error::ConnectionClosed.to_string(), "WebSocket closed");
        assert_eq!(
            Error::ExtensionNotConnected.to_string(),
            "Extension not connected"
        );
    }

    #[test]
    fn test_extension_error_passthrough() {
        let err = Error::extension("No tab is currently attached");
        assert_eq!(err.to_string(), "No tab is currently attached");
        assert!(err.is_extension_error());
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let closed_err = Error::ConnectionClosed;
        let missing_err = Error::ExtensionNotConnected;
        let other_err = Error::protocol("test");

        assert!(conn_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(missing_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
