/// Auth sessions: who is calling, resolved from a bearer token
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An authenticated caller. Every service operation takes one of these
/// explicitly; there is no ambient current-user state anywhere in the crate.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub email: String,
}

impl AuthSession {
    pub fn new(user_id: &str, email: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: email.to_string(),
        }
    }
}

/// Token resolution seam. The marketplace's auth service sits behind this in
/// production; the demo and tests use `StaticTokens`.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthSession>;
}

/// In-memory bearer-token registry
#[derive(Clone, Default)]
pub struct StaticTokens {
    tokens: Arc<RwLock<HashMap<String, AuthSession>>>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, token: &str, session: AuthSession) {
        self.tokens.write().await.insert(token.to_string(), session);
    }

    pub async fn revoke(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

#[async_trait]
impl AuthProvider for StaticTokens {
    async fn authenticate(&self, token: &str) -> Result<AuthSession> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| ChatError::Unauthenticated("invalid or expired token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_authenticate() {
        let tokens = StaticTokens::new();
        tokens
            .issue("tok-1", AuthSession::new("u1", "u1@campus.edu"))
            .await;

        let session = tokens.authenticate("tok-1").await.unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.email, "u1@campus.edu");

        assert!(tokens.authenticate("tok-2").await.is_err());

        tokens.revoke("tok-1").await;
        assert!(tokens.authenticate("tok-1").await.is_err());
    }
}
