//! Authenticator backed by a remote HTTPS identity provider.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{AuthFailureReason, AuthReply, Authenticator};

#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    token: &'a str,
    nonce: &'a str,
    client_name: &'a str,
    client_uuid: &'a str,
    peer_address: String,
}

#[derive(Debug, Deserialize)]
struct AuthenticateResponse {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Validates tokens against a remote HTTPS endpoint via a single `POST`.
///
/// The endpoint is expected to return `{"user_id": "..."}` on success or
/// `{"error": "bad_token" | "unauthorized" | ...}` on failure.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthenticator {
    /// Build an authenticator pointed at `base_url`, with a request timeout
    /// bounded well under the dispatcher's own call timeout so the relay can
    /// still report a clean `AuthServerNotResponding` rather than the
    /// generic `Command timed out`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(
        &self,
        token: &str,
        nonce: &str,
        client_name: &str,
        client_uuid: &str,
        peer_address: SocketAddr,
    ) -> AuthReply {
        let body = AuthenticateRequest {
            token,
            nonce,
            client_name,
            client_uuid,
            peer_address: peer_address.to_string(),
        };

        let response = match self
            .client
            .post(format!("{}/authenticate", self.base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "authentication server unreachable");
                return AuthReply::Failure(AuthFailureReason::AuthServerNotResponding);
            }
        };

        if !response.status().is_success() {
            return AuthReply::Failure(match response.status().as_u16() {
                401 | 403 => AuthFailureReason::Unauthorized,
                400 => AuthFailureReason::BadToken,
                _ => AuthFailureReason::Unknown,
            });
        }

        match response.json::<AuthenticateResponse>().await {
            Ok(AuthenticateResponse {
                user_id: Some(user_id),
                ..
            }) => AuthReply::Success { user_id },
            Ok(AuthenticateResponse {
                error: Some(reason),
                ..
            }) => AuthReply::Failure(match reason.as_str() {
                "bad_token" => AuthFailureReason::BadToken,
                "unauthorized" => AuthFailureReason::Unauthorized,
                _ => AuthFailureReason::Unknown,
            }),
            Ok(_) => AuthReply::Failure(AuthFailureReason::Unknown),
            Err(err) => {
                warn!(error = %err, "malformed authentication server response");
                AuthReply::Failure(AuthFailureReason::Unknown)
            }
        }
    }
}
