//! In-memory authenticator for local development and tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{AuthFailureReason, AuthReply, Authenticator};

/// Authenticator that replies from a fixed token -> user-id table, optionally
/// after an artificial delay. Tokens absent from the table are rejected as
/// [`AuthFailureReason::BadToken`].
///
/// A configured delay exceeding the dispatcher's call timeout is how the
/// S5 "call times out" scenario is exercised without a real network.
pub struct MockAuthenticator {
    tokens: RwLock<HashMap<String, String>>,
    delay: Duration,
    never_reply: bool,
}

impl MockAuthenticator {
    /// An authenticator that accepts the given tokens immediately.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: RwLock::new(tokens),
            delay: Duration::ZERO,
            never_reply: false,
        }
    }

    /// Same as [`Self::new`] but waits `delay` before answering.
    pub fn with_delay(tokens: HashMap<String, String>, delay: Duration) -> Self {
        Self {
            tokens: RwLock::new(tokens),
            delay,
            never_reply: false,
        }
    }

    /// An authenticator whose calls never resolve, for exercising timeout
    /// handling in the dispatcher.
    pub fn never_reply() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            delay: Duration::ZERO,
            never_reply: true,
        }
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate(
        &self,
        token: &str,
        _nonce: &str,
        _client_name: &str,
        _client_uuid: &str,
        _peer_address: SocketAddr,
    ) -> AuthReply {
        if self.never_reply {
            std::future::pending::<()>().await;
            unreachable!("pending future never resolves");
        }

        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }

        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        match tokens.get(token) {
            Some(user_id) => AuthReply::Success {
                user_id: user_id.clone(),
            },
            None => AuthReply::Failure(AuthFailureReason::BadToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_token_succeeds() {
        let mut tokens = HashMap::new();
        tokens.insert("tok-a".to_string(), "user-1".to_string());
        let auth = MockAuthenticator::new(tokens);

        let reply = auth
            .authenticate(
                "tok-a",
                "nonce",
                "client",
                "uuid",
                "127.0.0.1:1".parse().unwrap_or_else(|_| unreachable!()),
            )
            .await;
        assert_eq!(
            reply,
            AuthReply::Success {
                user_id: "user-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_token_fails() {
        let auth = MockAuthenticator::new(HashMap::new());
        let reply = auth
            .authenticate(
                "nope",
                "nonce",
                "client",
                "uuid",
                "127.0.0.1:1".parse().unwrap_or_else(|_| unreachable!()),
            )
            .await;
        assert_eq!(reply, AuthReply::Failure(AuthFailureReason::BadToken));
    }
}
