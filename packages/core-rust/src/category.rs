//! Prefix-based message classification.
//!
//! The `type` string of an envelope decides how the router treats it. The
//! decision is a lookup in [`PREFIX_TABLE`], so adding a category means
//! adding a row rather than touching dispatch logic.

use std::fmt;

/// Category of an envelope, derived from its `type` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    /// `request.*` -- exactly one handler, correlated reply.
    Request,
    /// `event.*` -- zero or more handlers, no reply.
    Event,
    /// `error.*` -- produced by the router, never dispatched.
    Error,
    /// `system.*` -- produced by the router, never dispatched.
    System,
}

/// Prefix -> category table consulted by [`classify`].
pub const PREFIX_TABLE: &[(&str, MessageCategory)] = &[
    ("request.", MessageCategory::Request),
    ("event.", MessageCategory::Event),
    ("error.", MessageCategory::Error),
    ("system.", MessageCategory::System),
];

impl MessageCategory {
    /// Whether inbound messages of this category reach handlers.
    #[must_use]
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::Request | Self::Event)
    }

    /// Stable lowercase label, used for log fields and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Event => "event",
            Self::Error => "error",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from classifying an envelope type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("unroutable message type: '{message_type}'")]
    Unroutable { message_type: String },
}

/// Classifies a message `type` by its prefix.
///
/// # Errors
///
/// Returns `ClassifyError::Unroutable` when no prefix in [`PREFIX_TABLE`]
/// matches. Unknown types are an error condition, never silently dropped.
pub fn classify(message_type: &str) -> Result<MessageCategory, ClassifyError> {
    PREFIX_TABLE
        .iter()
        .find(|(prefix, _)| message_type.starts_with(prefix))
        .map(|(_, category)| *category)
        .ok_or_else(|| ClassifyError::Unroutable {
            message_type: message_type.to_string(),
        })
}
