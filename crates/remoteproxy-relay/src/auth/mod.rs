//! Pluggable external authentication for the relay.
//!
//! The relay never issues or validates credentials itself; it hands each
//! `Authentication.Authenticate` call to an [`Authenticator`] implementation
//! and waits for an [`AuthReply`].

pub mod http;
pub mod mock;

pub use http::HttpAuthenticator;
pub use mock::MockAuthenticator;

use async_trait::async_trait;
use std::net::SocketAddr;

/// Reason an authentication attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    /// The token itself was rejected by the identity provider.
    BadToken,
    /// The token was well-formed but the holder isn't authorized.
    Unauthorized,
    /// The identity provider returned something the relay doesn't understand.
    Unknown,
    /// The identity provider could not be reached or timed out.
    AuthServerNotResponding,
    /// The attempt was abandoned (e.g. the client disconnected mid-call).
    Aborted,
}

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    /// Authentication succeeded; `user_id` scopes subsequent tunnel pairing.
    Success { user_id: String },
    /// Authentication failed for the given reason.
    Failure(AuthFailureReason),
}

/// External identity check consulted on every `Authentication.Authenticate` call.
///
/// Implementations must be safe to invoke concurrently from many client
/// connections at once; the relay holds exactly one shared instance
/// (`Arc<dyn Authenticator>`).
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate a client-presented token/nonce pair.
    async fn authenticate(
        &self,
        token: &str,
        nonce: &str,
        client_name: &str,
        client_uuid: &str,
        peer_address: SocketAddr,
    ) -> AuthReply;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_are_distinguishable() {
        assert_ne!(AuthFailureReason::BadToken, AuthFailureReason::Unauthorized);
    }
}
