//! JSON-RPC request/notification dispatcher (C4).
//!
//! Parses one inbound frame, validates it against the declared schema, and
//! either produces an immediate reply or hands back a request to begin an
//! asynchronous authenticate call. Everything here runs inside the engine
//! executor against a single [`ProxySession`]; it never touches any other
//! session or the registry directly (pairing happens in `engine.rs` after a
//! successful authenticate).

use remoteproxy_core::jsonrpc::{AuthenticateParams, RpcResponse};
use serde_json::Value;

use crate::client::{ClientState, ProxySession};
use crate::handlers::{self, find_method};

/// Outcome of dispatching one inbound frame.
pub enum DispatchAction {
    /// Send a synchronous reply; keep the connection open.
    Reply(RpcResponse),
    /// Send a reply, then forcibly close the connection. Used for every
    /// protocol-layer error per §7: once a peer misbehaves at this layer
    /// there is no safe recovery.
    ReplyAndKill(RpcResponse),
    /// Begin an asynchronous `Authentication.Authenticate` call. The engine
    /// transitions the session to `Authenticating` and spawns the
    /// authenticator call racing the call timeout.
    BeginAuthenticate {
        request_id: i64,
        params: AuthenticateParams,
    },
}

/// Dispatch one inbound frame against `session`.
pub fn dispatch(session: &ProxySession, server_name: &str, raw: &[u8]) -> DispatchAction {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t,
        Err(err) => {
            return DispatchAction::ReplyAndKill(RpcResponse::error(
                -1,
                format!("Failed to parse JSON data: {err}"),
            ));
        }
    };

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            return DispatchAction::ReplyAndKill(RpcResponse::error(
                -1,
                format!("Failed to parse JSON data: {err}"),
            ));
        }
    };

    let Some(id) = value.get("id").and_then(Value::as_i64) else {
        return DispatchAction::ReplyAndKill(RpcResponse::error(
            -1,
            "Error parsing command. Missing 'id'",
        ));
    };

    let Some(method) = value.get("method").and_then(Value::as_str) else {
        return DispatchAction::ReplyAndKill(RpcResponse::error(
            id,
            "Error parsing command. Missing 'method'",
        ));
    };

    let mut parts = method.split('.');
    let (Some(namespace), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return DispatchAction::ReplyAndKill(RpcResponse::error(
            id,
            format!("Invalid method name '{method}'"),
        ));
    };

    let Some(_schema) = find_method(namespace, name) else {
        return DispatchAction::ReplyAndKill(RpcResponse::error(id, "No such namespace"));
    };

    let params = value.get("params").cloned().unwrap_or(Value::Null);

    match (namespace, name) {
        ("RemoteProxy", "Hello") => {
            let result = handlers::hello_result(server_name);
            match serde_json::to_value(result) {
                Ok(v) => DispatchAction::Reply(RpcResponse::success(id, v)),
                Err(err) => DispatchAction::ReplyAndKill(RpcResponse::error(id, err.to_string())),
            }
        }
        ("RemoteProxy", "Introspect") => {
            DispatchAction::Reply(RpcResponse::success(id, handlers::introspect_result()))
        }
        ("Authentication", "Authenticate") => dispatch_authenticate(session, id, params),
        _ => DispatchAction::ReplyAndKill(RpcResponse::error(id, "No such namespace")),
    }
}

fn dispatch_authenticate(session: &ProxySession, id: i64, params: Value) -> DispatchAction {
    if session.state != ClientState::Connected {
        return DispatchAction::ReplyAndKill(RpcResponse::error(
            id,
            "Authentication already done",
        ));
    }

    match serde_json::from_value::<AuthenticateParams>(params) {
        Ok(params) => DispatchAction::BeginAuthenticate {
            request_id: id,
            params,
        },
        Err(err) => DispatchAction::ReplyAndKill(RpcResponse::error(
            id,
            format!("Invalid params: {err}"),
        )),
    }
}
