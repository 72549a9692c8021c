//! Wire-level JSON-RPC DTOs shared between the relay and any client
//! implementation.
//!
//! These types describe the envelope only — method dispatch, schema
//! validation, and handler invocation live in `remoteproxy-relay`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request sent by a client: `{ "id": 1, "method": "Namespace.Method", "params": {...} }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A response sent to a client in reply to an [`RpcRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub id: i64,
    pub status: RpcStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    /// Build a success response carrying a result map.
    pub fn success(id: i64, params: Value) -> Self {
        Self {
            id,
            status: RpcStatus::Success,
            params: Some(params),
            error: None,
        }
    }

    /// Build an error response. `id` is `-1` for failures that occur before
    /// a request id could be parsed out of the incoming frame.
    pub fn error(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: RpcStatus::Error,
            params: None,
            error: Some(message.into()),
        }
    }
}

/// Outcome discriminator for [`RpcResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcStatus {
    Success,
    Error,
}

/// An unsolicited server-to-client message: `{ "notification": "Namespace.Signal", "params": {...} }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub notification: String,
    pub params: Value,
}

impl RpcNotification {
    pub fn new(notification: impl Into<String>, params: Value) -> Self {
        Self {
            notification: notification.into(),
            params,
        }
    }
}

/// Authentication outcome enumeration returned inside `Authentication.Authenticate`'s
/// `params.authenticationError` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationError {
    #[serde(rename = "AuthenticationErrorNoError")]
    NoError,
    #[serde(rename = "AuthenticationErrorAuthenticationServerNotResponding")]
    AuthenticationServerNotResponding,
    #[serde(rename = "AuthenticationErrorAuthenticationError")]
    AuthenticationError,
    #[serde(rename = "AuthenticationErrorProxyError")]
    ProxyError,
    #[serde(rename = "AuthenticationErrorUnknown")]
    Unknown,
}

/// Parameters for `Authentication.Authenticate`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateParams {
    pub uuid: String,
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub nonce: String,
}

/// Result payload for `Authentication.Authenticate`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticateResult {
    #[serde(rename = "authenticationError")]
    pub authentication_error: AuthenticationError,
}

/// Result payload for `RemoteProxy.Hello`.
#[derive(Debug, Clone, Serialize)]
pub struct HelloResult {
    pub server: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
}

/// Params for the `Authentication.TunnelEstablished` notification.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelEstablishedParams {
    #[serde(rename = "clientName")]
    pub client_name: String,
    #[serde(rename = "clientUuid")]
    pub client_uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_omits_error_field() {
        let resp = RpcResponse::success(1, serde_json::json!({"ok": true}));
        let encoded = serde_json::to_value(&resp).unwrap_or_else(|_| serde_json::json!(null));
        assert!(encoded.get("error").is_none());
    }

    #[test]
    fn error_response_omits_params_field() {
        let resp = RpcResponse::error(-1, "boom");
        let encoded = serde_json::to_value(&resp).unwrap_or_else(|_| serde_json::json!(null));
        assert!(encoded.get("params").is_none());
        assert_eq!(encoded["error"], "boom");
    }

    #[test]
    fn authentication_error_serializes_to_expected_wire_strings() {
        let encoded = serde_json::to_string(&AuthenticationError::NoError).unwrap_or_default();
        assert_eq!(encoded, "\"AuthenticationErrorNoError\"");
    }

    #[test]
    fn request_deserializes_without_params() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"id":7,"method":"RemoteProxy.Hello"}"#).unwrap_or_else(|_| {
                panic!("expected valid request")
            });
        assert_eq!(req.id, 7);
        assert!(req.params.is_null());
    }
}
