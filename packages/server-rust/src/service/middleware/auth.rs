//! Token authentication middleware.
//!
//! Reads the bearer credential from `context.auth.token`, verifies it, and
//! writes the verified identity back into the context. Requests are never
//! rejected here; handlers decide what an anonymous caller may do.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use switchboard_core::{AuthContext, Message};
use tracing::{debug, warn};

use super::chain::{Middleware, Next};
use crate::network::ClientId;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CUSTOMER: &str = "customer";

/// Identity recovered from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
}

impl VerifiedUser {
    #[must_use]
    pub fn role(&self) -> &'static str {
        if self.is_admin {
            ROLE_ADMIN
        } else {
            ROLE_CUSTOMER
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Verifies a raw credential (without the `Bearer ` prefix).
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError>;
}

// ---------------------------------------------------------------------------
// JwtVerifier
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    id: String,
    email: String,
    is_admin: bool,
    iat: u64,
    exp: u64,
}

/// HS256 verifier and issuer sharing one secret.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expires_in: Duration,
}

impl JwtVerifier {
    #[must_use]
    pub fn from_secret(secret: &[u8], expires_in: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            expires_in,
        }
    }

    /// Mints a token for `user` that expires after the configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Jwt` if signing fails.
    pub fn issue(&self, user: &VerifiedUser) -> Result<String, AuthError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            id: user.id.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            iat,
            exp: iat + self.expires_in.as_secs(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.id.trim().is_empty() {
            return Err(AuthError::Rejected("token carries no user id".into()));
        }
        Ok(VerifiedUser {
            id: data.claims.id,
            email: data.claims.email,
            is_admin: data.claims.is_admin,
        })
    }
}

// ---------------------------------------------------------------------------
// AuthMiddleware
// ---------------------------------------------------------------------------

/// Replaces any client-asserted `userId`/`roles` with the verified identity,
/// or removes them when the token is missing or invalid.
pub struct AuthMiddleware<V> {
    verifier: V,
}

impl<V: TokenVerifier> AuthMiddleware<V> {
    #[must_use]
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }
}

fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token)
}

#[async_trait]
impl<V: TokenVerifier> Middleware for AuthMiddleware<V> {
    async fn handle(
        &self,
        mut message: Message,
        client_id: &ClientId,
        next: Next<'_>,
    ) -> anyhow::Result<Option<Message>> {
        let token = message
            .context
            .as_ref()
            .and_then(|ctx| ctx.auth.as_ref())
            .and_then(|auth| auth.token.clone());

        let verified = match token.as_deref() {
            Some(raw) => match self.verifier.verify(strip_bearer(raw)).await {
                Ok(user) => {
                    debug!(client_id = %client_id, user_id = %user.id, role = user.role(), "token verified");
                    Some(user)
                }
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "invalid token");
                    None
                }
            },
            None => {
                debug!(client_id = %client_id, "unauthenticated message");
                None
            }
        };

        if token.is_some() || message.context.as_ref().is_some_and(|c| c.auth.is_some()) {
            let auth = message.context_mut().auth.get_or_insert_with(AuthContext::default);
            auth.user_id = verified.as_ref().map(|user| user.id.clone());
            auth.roles = verified.as_ref().map(|user| vec![user.role().to_string()]);
        }

        next.run(message).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;
    use switchboard_core::MessageContext;

    use super::*;
    use crate::service::middleware::chain::{MiddlewareChain, Terminal};
    use crate::service::registry::{request_fn, HandlerRegistry};

    const SECRET: &[u8] = b"test-secret";

    fn verifier() -> JwtVerifier {
        JwtVerifier::from_secret(SECRET, Duration::from_secs(3600))
    }

    fn alice(is_admin: bool) -> VerifiedUser {
        VerifiedUser {
            id: "u-1".into(),
            email: "alice@example.com".into(),
            is_admin,
        }
    }

    /// Runs `message` through the auth middleware and returns the auth
    /// context the handler saw.
    async fn seen_auth(message: Message) -> Option<AuthContext> {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let registry = HandlerRegistry::new();
        registry
            .register_request(
                "request.whoami",
                request_fn(move |message: Message, _| {
                    let sink = Arc::clone(&sink);
                    async move {
                        *sink.lock() = message.context.clone().and_then(|c| c.auth);
                        Ok(Message::reply_to(&message, "response.whoami", json!({})))
                    }
                }),
            )
            .unwrap();

        let chain = MiddlewareChain::new();
        chain.push(Arc::new(AuthMiddleware::new(verifier())));
        chain
            .execute(message, &ClientId::new("c1"), Terminal::Request(&registry))
            .await
            .unwrap();
        let auth = seen.lock().clone();
        auth
    }

    fn with_token(token: &str) -> Message {
        Message::new("request.whoami", json!({})).with_context(MessageContext {
            auth: Some(AuthContext {
                token: Some(token.to_string()),
                ..AuthContext::default()
            }),
            tracing: None,
        })
    }

    #[tokio::test]
    async fn issued_token_verifies() {
        let verifier = verifier();
        let token = verifier.issue(&alice(false)).unwrap();
        assert_eq!(verifier.verify(&token).await.unwrap(), alice(false));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let token = JwtVerifier::from_secret(b"other", Duration::from_secs(60))
            .issue(&alice(false))
            .unwrap();
        assert!(matches!(
            verifier().verify(&token).await,
            Err(AuthError::Jwt(_))
        ));
    }

    #[tokio::test]
    async fn token_without_user_id_is_rejected() {
        let verifier = verifier();
        let anonymous = VerifiedUser {
            id: String::new(),
            ..alice(false)
        };
        let token = verifier.issue(&anonymous).unwrap();
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::Rejected(_))
        ));

        let auth = seen_auth(with_token(&token)).await.unwrap();
        assert!(auth.user_id.is_none());
        assert!(auth.roles.is_none());
    }

    #[tokio::test]
    async fn valid_bearer_token_sets_identity() {
        let token = verifier().issue(&alice(true)).unwrap();
        let auth = seen_auth(with_token(&format!("Bearer {token}"))).await.unwrap();

        assert_eq!(auth.user_id.as_deref(), Some("u-1"));
        assert!(auth.has_role(ROLE_ADMIN));
        assert!(auth.token.is_some());
    }

    #[tokio::test]
    async fn bare_token_is_accepted() {
        let token = verifier().issue(&alice(false)).unwrap();
        let auth = seen_auth(with_token(&token)).await.unwrap();
        assert!(auth.has_role(ROLE_CUSTOMER));
    }

    #[tokio::test]
    async fn invalid_token_continues_without_identity() {
        let auth = seen_auth(with_token("garbage")).await.unwrap();
        assert!(auth.user_id.is_none());
        assert!(auth.roles.is_none());
    }

    #[tokio::test]
    async fn asserted_identity_without_token_is_removed() {
        let message = Message::new("request.whoami", json!({})).with_context(MessageContext {
            auth: Some(AuthContext {
                user_id: Some("root".into()),
                roles: Some(vec![ROLE_ADMIN.into()]),
                token: None,
            }),
            tracing: None,
        });

        let auth = seen_auth(message).await.unwrap();
        assert!(auth.user_id.is_none());
        assert!(!auth.has_role(ROLE_ADMIN));
    }

    #[tokio::test]
    async fn message_without_context_passes_through() {
        let auth = seen_auth(Message::new("request.whoami", json!({}))).await;
        assert!(auth.is_none());
    }
}
