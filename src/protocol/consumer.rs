//! Consumer-facing message types.
//!
//! Defines the message format between the automation client (consumer) and
//! the relay. The wire shapes are CDP's own: commands carry an `id` chosen
//! by the consumer; everything the relay sends back is either a response
//! (has `id`) or an event (has `method`, no `id`).
//!
//! # Format
//!
//! Command (consumer → relay):
//! ```json
//! { "id": 7, "sessionId": "S1", "method": "Page.navigate", "params": { ... } }
//! ```
//!
//! Response (relay → consumer):
//! ```json
//! { "id": 7, "sessionId": "S1", "result": { ... } }
//! { "id": 7, "error": { "message": "Extension not connected" } }
//! ```
//!
//! Event (relay → consumer):
//! ```json
//! { "sessionId": "S1", "method": "Network.requestWillBeSent", "params": { ... } }
//! ```
//!
//! Exactly one of {`id` present → response} or {`method` present, `id`
//! absent → event} holds for any [`ConsumerMessage`]; the discriminator is
//! derived from field presence at parse time rather than probed at each
//! use site.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{CommandId, SessionId};

// ============================================================================
// ConsumerCommand
// ============================================================================

/// A CDP command from the consumer.
///
/// `id` is unique per consumer connection and monotonically assigned by the
/// remote caller; the relay echoes it back verbatim and never uses it for
/// its own correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerCommand {
    /// Consumer-assigned correlation id, echoed in the response.
    pub id: CommandId,

    /// Target session, if the command is session-scoped.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,

    /// CDP method in `Domain.method` format.
    pub method: String,

    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ConsumerCommand {
    /// Creates a command.
    #[inline]
    #[must_use]
    pub fn new(id: CommandId, method: impl Into<String>) -> Self {
        Self {
            id,
            session_id: None,
            method: method.into(),
            params: None,
        }
    }

    /// Sets the target session.
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Sets the method parameters.
    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

// ============================================================================
// ConsumerMessage
// ============================================================================

/// Any message the relay sends to the consumer.
///
/// Discriminated union per direction: a [`ResponseMessage`] carries `id`,
/// an [`EventMessage`] carries `method` and no `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsumerMessage {
    /// Response to a consumer command.
    Response(ResponseMessage),
    /// Unsolicited protocol event.
    Event(EventMessage),
}

impl ConsumerMessage {
    /// Returns `true` if this is a response.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Returns `true` if this is an event.
    #[inline]
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }
}

impl From<ResponseMessage> for ConsumerMessage {
    fn from(message: ResponseMessage) -> Self {
        Self::Response(message)
    }
}

impl From<EventMessage> for ConsumerMessage {
    fn from(message: EventMessage) -> Self {
        Self::Event(message)
    }
}

// ============================================================================
// ResponseMessage
// ============================================================================

/// A response to one consumer command.
///
/// Carries the command's own `id` and `sessionId`; exactly one of `result`
/// or `error` is populated for forwarded commands, and both may be absent
/// for a plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// The originating command's id, echoed verbatim.
    pub id: CommandId,

    /// The originating command's session, echoed verbatim.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,

    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error payload on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CdpError>,
}

impl ResponseMessage {
    /// Creates a plain acknowledgement (no result, no error).
    #[inline]
    #[must_use]
    pub fn ack(id: CommandId, session_id: Option<SessionId>) -> Self {
        Self {
            id,
            session_id,
            result: None,
            error: None,
        }
    }

    /// Creates a success response with a result payload.
    #[inline]
    #[must_use]
    pub fn result(id: CommandId, session_id: Option<SessionId>, result: Value) -> Self {
        Self {
            id,
            session_id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn error(id: CommandId, session_id: Option<SessionId>, message: impl Into<String>) -> Self {
        Self {
            id,
            session_id,
            result: None,
            error: Some(CdpError::new(message)),
        }
    }

    /// Returns `true` if this response carries an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// EventMessage
// ============================================================================

/// An unsolicited protocol event delivered to the consumer.
///
/// Never carries an `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Session the event is scoped to, if any.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,

    /// CDP event name in `Domain.event` format.
    pub method: String,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl EventMessage {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        session_id: Option<SessionId>,
        params: Option<Value>,
    ) -> Self {
        Self {
            session_id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// CdpError
// ============================================================================

/// The error payload of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpError {
    /// Numeric error code, if the producer assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Human-readable error message.
    pub message: String,
}

impl CdpError {
    /// Creates an error payload without a code.
    #[inline]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_command_deserialization() {
        let json_str = r#"{
            "id": 7,
            "sessionId": "S1",
            "method": "Page.navigate",
            "params": { "url": "https://example.com" }
        }"#;

        let command: ConsumerCommand = serde_json::from_str(json_str).expect("parse");
        assert_eq!(command.id, CommandId::new(7));
        assert_eq!(command.session_id, Some(SessionId::from("S1")));
        assert_eq!(command.method, "Page.navigate");
        assert!(command.params.is_some());
    }

    #[test]
    fn test_command_optional_fields_absent() {
        let command: ConsumerCommand =
            serde_json::from_str(r#"{ "id": 1, "method": "Browser.getVersion" }"#).expect("parse");
        assert!(command.session_id.is_none());
        assert!(command.params.is_none());
    }

    #[test]
    fn test_ack_serializes_to_bare_id() {
        let ack = ResponseMessage::ack(CommandId::new(7), None);
        let value = serde_json::to_value(&ack).expect("serialize");
        assert_eq!(value, json!({ "id": 7 }));
    }

    #[test]
    fn test_error_response_shape() {
        let response = ResponseMessage::error(
            CommandId::new(3),
            Some(SessionId::from("S1")),
            "Extension not connected",
        );
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": 3,
                "sessionId": "S1",
                "error": { "message": "Extension not connected" }
            })
        );
        assert!(response.is_error());
    }

    #[test]
    fn test_event_has_no_id_field() {
        let event = EventMessage::new(
            "Network.requestWillBeSent",
            Some(SessionId::from("S1")),
            Some(json!({ "requestId": "42" })),
        );
        let value = serde_json::to_value(ConsumerMessage::from(event)).expect("serialize");
        assert_eq!(
            value,
            json!({
                "sessionId": "S1",
                "method": "Network.requestWillBeSent",
                "params": { "requestId": "42" }
            })
        );
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_untagged_discrimination() {
        let response: ConsumerMessage =
            serde_json::from_str(r#"{ "id": 9, "result": {} }"#).expect("parse");
        assert!(response.is_response());

        let event: ConsumerMessage =
            serde_json::from_str(r#"{ "method": "Page.loadEventFired", "params": {} }"#)
                .expect("parse");
        assert!(event.is_event());
    }
}
