//! Optional per-message context: caller identity and trace correlation.

use serde::{Deserialize, Serialize};

/// Per-message context carrying identity and tracing information.
///
/// Threaded through middleware and handlers unchanged unless a middleware
/// (e.g. authentication) enriches it. Replies and error envelopes copy the
/// context of the message they answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<AuthContext>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tracing: Option<TracingContext>,
}

/// Identity attached to a message.
///
/// `token` is supplied by the client; `user_id` and `roles` are filled in by
/// the server once the token has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub roles: Option<Vec<String>>,
    /// Bearer credential presented by the client, with or without the
    /// `Bearer ` prefix.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
}

impl AuthContext {
    /// Returns true if `role` is among the verified roles.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles
            .as_deref()
            .is_some_and(|roles| roles.iter().any(|r| r == role))
    }
}

/// Distributed-trace correlation identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,
}
