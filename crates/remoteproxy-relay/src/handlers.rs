//! RPC handlers (C5) and the static method/notification schema used both to
//! validate incoming calls and to answer `RemoteProxy.Introspect`.

use serde_json::{json, Value};

use remoteproxy_core::jsonrpc::HelloResult;

/// API version advertised in `RemoteProxy.Hello` and `Introspect`. Bumped
/// whenever the wire schema below changes in an incompatible way.
pub const API_VERSION: &str = "1.0";

/// A single declared RPC parameter or return field: name plus a basic type
/// name (`"string"`, `"int"`, `"bool"`, `"object"`), used only for the
/// introspection dump -- actual validation happens by attempting to
/// deserialize into the concrete params struct (see `dispatch.rs`).
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: &'static str,
}

/// Static description of one namespaced method, for `Introspect`.
pub struct MethodSchema {
    pub namespace: &'static str,
    pub method: &'static str,
    pub params: &'static [FieldSchema],
    pub returns: &'static [FieldSchema],
}

/// Static description of one notification, for `Introspect`.
pub struct NotificationSchema {
    pub namespace: &'static str,
    pub signal: &'static str,
    pub params: &'static [FieldSchema],
}

const AUTHENTICATE_PARAMS: &[FieldSchema] = &[
    FieldSchema {
        name: "uuid",
        kind: "string",
    },
    FieldSchema {
        name: "name",
        kind: "string",
    },
    FieldSchema {
        name: "token",
        kind: "string",
    },
    FieldSchema {
        name: "nonce",
        kind: "string",
    },
];

const AUTHENTICATE_RETURNS: &[FieldSchema] = &[FieldSchema {
    name: "authenticationError",
    kind: "enum",
}];

const HELLO_RETURNS: &[FieldSchema] = &[
    FieldSchema {
        name: "server",
        kind: "string",
    },
    FieldSchema {
        name: "name",
        kind: "string",
    },
    FieldSchema {
        name: "version",
        kind: "string",
    },
    FieldSchema {
        name: "apiVersion",
        kind: "string",
    },
];

const INTROSPECT_RETURNS: &[FieldSchema] = &[
    FieldSchema {
        name: "methods",
        kind: "object",
    },
    FieldSchema {
        name: "types",
        kind: "object",
    },
    FieldSchema {
        name: "notifications",
        kind: "object",
    },
];

const TUNNEL_ESTABLISHED_PARAMS: &[FieldSchema] = &[
    FieldSchema {
        name: "clientName",
        kind: "string",
    },
    FieldSchema {
        name: "clientUuid",
        kind: "string",
    },
];

/// Every method the dispatcher knows how to route, in declaration order.
pub const METHODS: &[MethodSchema] = &[
    MethodSchema {
        namespace: "RemoteProxy",
        method: "Hello",
        params: &[],
        returns: HELLO_RETURNS,
    },
    MethodSchema {
        namespace: "RemoteProxy",
        method: "Introspect",
        params: &[],
        returns: INTROSPECT_RETURNS,
    },
    MethodSchema {
        namespace: "Authentication",
        method: "Authenticate",
        params: AUTHENTICATE_PARAMS,
        returns: AUTHENTICATE_RETURNS,
    },
];

/// Every notification the server may emit unsolicited.
pub const NOTIFICATIONS: &[NotificationSchema] = &[NotificationSchema {
    namespace: "Authentication",
    signal: "TunnelEstablished",
    params: TUNNEL_ESTABLISHED_PARAMS,
}];

/// Look up a method descriptor by namespace + method name.
pub fn find_method(namespace: &str, method: &str) -> Option<&'static MethodSchema> {
    METHODS
        .iter()
        .find(|m| m.namespace == namespace && m.method == method)
}

/// Build the `RemoteProxy.Hello` result.
pub fn hello_result(server_name: &str) -> HelloResult {
    HelloResult {
        server: server_name.to_string(),
        name: "remoteproxy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: API_VERSION.to_string(),
    }
}

fn fields_to_json(fields: &[FieldSchema]) -> Value {
    fields
        .iter()
        .map(|f| (f.name.to_string(), Value::String(f.kind.to_string())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// Build the full `RemoteProxy.Introspect` result: `{ methods, types, notifications }`.
///
/// Not re-validated against any "returns" schema, since it describes the
/// validator itself (§4.4).
pub fn introspect_result() -> Value {
    let methods: Value = METHODS
        .iter()
        .map(|m| {
            (
                format!("{}.{}", m.namespace, m.method),
                json!({
                    "params": fields_to_json(m.params),
                    "returns": fields_to_json(m.returns),
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    let notifications: Value = NOTIFICATIONS
        .iter()
        .map(|n| {
            (
                format!("{}.{}", n.namespace, n.signal),
                json!({ "params": fields_to_json(n.params) }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    let types = json!({
        "AuthenticationError": [
            "AuthenticationErrorNoError",
            "AuthenticationErrorAuthenticationServerNotResponding",
            "AuthenticationErrorAuthenticationError",
            "AuthenticationErrorProxyError",
            "AuthenticationErrorUnknown",
        ],
    });

    json!({
        "methods": methods,
        "types": types,
        "notifications": notifications,
    })
}
