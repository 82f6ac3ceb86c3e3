//! The message envelope exchanged between clients and the router.
//!
//! Frames on both transports are the UTF-8 JSON encoding of [`Message`].
//! Keys are camelCase to stay wire-compatible with existing clients.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::{classify, ClassifyError, MessageCategory};
use crate::context::MessageContext;

/// Error code carried by every router-synthesized error envelope.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Type of the notice broadcast to every client before shutdown.
pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single envelope.
///
/// `payload` is opaque to the router: each handler decodes it against the
/// shape it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Correlates a request with its reply.
    pub id: String,
    /// Dotted type; the prefix selects the [`MessageCategory`].
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<MessageContext>,
}

impl Message {
    /// Creates a fresh envelope with a random id and the current time.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload,
            timestamp: now_millis(),
            context: None,
        }
    }

    /// Builds a reply correlated with `request`: same id, same context.
    ///
    /// The caller's bearer token is never echoed back.
    #[must_use]
    pub fn reply_to(request: &Message, message_type: impl Into<String>, payload: Value) -> Self {
        let mut context = request.context.clone();
        if let Some(auth) = context.as_mut().and_then(|c| c.auth.as_mut()) {
            auth.token = None;
        }
        Self {
            id: request.id.clone(),
            message_type: message_type.into(),
            payload,
            timestamp: now_millis(),
            context,
        }
    }

    /// Builds the `error.<type>` envelope sent when processing `original` failed.
    ///
    /// Only the error's message text reaches the wire; the code is always
    /// [`INTERNAL_ERROR`].
    #[must_use]
    pub fn error_for(original: &Message, error_message: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            message: error_message.into(),
            code: INTERNAL_ERROR.to_string(),
        };
        Self::reply_to(
            original,
            format!("error.{}", original.message_type),
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    /// Builds the `system.shutdown` notice.
    #[must_use]
    pub fn system_shutdown(reason: impl Into<String>, reconnect_in_ms: u64) -> Self {
        let notice = ShutdownNotice {
            reason: reason.into(),
            reconnect_in: reconnect_in_ms,
        };
        Self::new(
            SYSTEM_SHUTDOWN,
            serde_json::to_value(notice).unwrap_or(Value::Null),
        )
    }

    /// Attaches a context, replacing any existing one.
    #[must_use]
    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Classifies this envelope by its type prefix.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::Unroutable` for unknown prefixes.
    pub fn category(&self) -> Result<MessageCategory, ClassifyError> {
        classify(&self.message_type)
    }

    /// Returns the context, creating an empty one if absent.
    pub fn context_mut(&mut self) -> &mut MessageContext {
        self.context.get_or_insert_with(MessageContext::default)
    }

    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the frame is not a valid envelope.
    pub fn from_json(frame: &str) -> Result<Self, CodecError> {
        serde_json::from_str(frame).map_err(CodecError::Decode)
    }

    /// Encodes this envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }
}

// ---------------------------------------------------------------------------
// Router-originated payloads
// ---------------------------------------------------------------------------

/// Payload of an `error.*` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

/// Payload of a `system.shutdown` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownNotice {
    pub reason: String,
    /// Suggested reconnect delay in milliseconds.
    pub reconnect_in: u64,
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Errors from encoding or decoding JSON frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
