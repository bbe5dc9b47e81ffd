//! Extension-facing envelope types.
//!
//! Defines the message format between the relay and the browser extension
//! that holds the real debugger attachment.
//!
//! # Format
//!
//! Request (relay → extension):
//! ```json
//! { "id": 1, "method": "attachToTab" }
//! { "id": 2, "method": "Page.navigate", "params": { ... }, "sessionId": "S1" }
//! ```
//!
//! Reply (extension → relay), correlated by relay-assigned `id`:
//! ```json
//! { "id": 2, "result": { ... } }
//! { "id": 2, "error": { "message": "tab went away" } }
//! ```
//!
//! Event (extension → relay), unsolicited, no `id`:
//! ```json
//! { "method": "forwardCDPEvent", "params": { "sessionId": "S1", "method": "...", "params": { ... } } }
//! { "method": "detachedFromTab", "params": { ... } }
//! ```
//!
//! The reply/event split is a discriminated union derived from `id`
//! presence at parse time. [`ExtensionEvent::parse`] further classifies
//! events into the vocabulary the relay understands.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SessionId};

// ============================================================================
// ExtensionRequest
// ============================================================================

/// A request from the relay to the extension.
///
/// `id` is relay-assigned and monotonically incrementing; see
/// [`crate::identifiers::RequestIdAllocator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRequest {
    /// Relay-assigned correlation id.
    pub id: RequestId,

    /// Method name: either relay vocabulary (`attachToTab`,
    /// `detachFromTab`) or a forwarded CDP method.
    pub method: String,

    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Debugger session the request is scoped to, if any.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

impl ExtensionRequest {
    /// Creates a request.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: None,
            session_id: None,
        }
    }

    /// Sets the method parameters.
    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Sets the target session.
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

// ============================================================================
// ExtensionMessage
// ============================================================================

/// Any message the extension sends to the relay.
///
/// A [`ExtensionReply`] carries the relay-assigned `id` it correlates to;
/// an [`ExtensionEvent`] carries `method` and no `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionMessage {
    /// Reply to a pending relay request.
    Reply(ExtensionReply),
    /// Unsolicited event.
    Event(ExtensionEvent),
}

// ============================================================================
// ExtensionReply
// ============================================================================

/// A correlated reply from the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionReply {
    /// Matches a pending request's relay-assigned id.
    pub id: RequestId,

    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error payload on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExtensionError>,
}

/// The error payload of an extension reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionError {
    /// Extension-reported error message.
    pub message: String,
}

// ============================================================================
// ExtensionEvent
// ============================================================================

/// An unsolicited event from the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionEvent {
    /// Event name.
    pub method: String,

    /// Event payload.
    #[serde(default)]
    pub params: Value,
}

impl ExtensionEvent {
    /// Classifies the event into the vocabulary the relay understands.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a `forwardCDPEvent` payload is
    /// missing its inner `method`. The caller treats that as fatal for the
    /// extension connection, since a half-parsed event would leave the
    /// consumer-facing stream inconsistent.
    pub fn parse(&self) -> Result<ParsedExtensionEvent> {
        match self.method.as_str() {
            "forwardCDPEvent" => {
                let forwarded: ForwardedCdpEvent = serde_json::from_value(self.params.clone())
                    .map_err(|e| {
                        Error::protocol(format!("Malformed forwardCDPEvent payload: {e}"))
                    })?;
                Ok(ParsedExtensionEvent::ForwardedCdpEvent(forwarded))
            }

            "detachedFromTab" => Ok(ParsedExtensionEvent::DetachedFromTab {
                params: self.params.clone(),
            }),

            _ => Ok(ParsedExtensionEvent::Unknown {
                method: self.method.clone(),
                params: self.params.clone(),
            }),
        }
    }
}

// ============================================================================
// ParsedExtensionEvent
// ============================================================================

/// Parsed extension events for type-safe handling.
#[derive(Debug, Clone)]
pub enum ParsedExtensionEvent {
    /// A CDP event to pass through to the consumer unchanged.
    ForwardedCdpEvent(ForwardedCdpEvent),

    /// The extension lost its debugger attachment.
    DetachedFromTab {
        /// Detach details (opaque to the relay).
        params: Value,
    },

    /// Unrecognized event.
    Unknown {
        /// Event name.
        method: String,
        /// Event payload.
        params: Value,
    },
}

/// The payload of a `forwardCDPEvent` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedCdpEvent {
    /// Session the original CDP event was scoped to.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,

    /// The original CDP event name.
    pub method: String,

    /// The original CDP event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

// ============================================================================
// Tests
// ============================================================================
