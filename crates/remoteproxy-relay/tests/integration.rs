#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests driving a real [`Engine`] over the raw-TCP transport,
//! covering the scenarios laid out for the tunnel-pairing protocol: hello,
//! successful pairing, relay, token mismatch, authenticate timeout, and
//! double authenticate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use remoteproxy_core::config::ProxyConfiguration;
use remoteproxy_relay::auth::MockAuthenticator;
use remoteproxy_relay::Engine;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn test_config(ws_port: u16, tcp_port: u16) -> ProxyConfiguration {
    let mut config = ProxyConfiguration::default();
    config.developer_mode = true;
    config.ws_listen_addr = format!("127.0.0.1:{ws_port}").parse().unwrap();
    config.tcp_listen_addr = format!("127.0.0.1:{tcp_port}").parse().unwrap();
    config.monitor_socket_path = PathBuf::new();
    config.call_timeout_secs = 1;
    config.auth_timeout_secs = 5;
    config.relay_inactivity_timeout_secs = 0;
    config
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

async fn send_line(stream: &mut TcpStream, value: &Value) {
    let mut line = serde_json::to_vec(value).unwrap();
    line.push(b'\n');
    stream.write_all(&line).await.unwrap();
}

async fn send_raw(stream: &mut TcpStream, bytes: &[u8]) {
    let mut line = bytes.to_vec();
    line.push(b'\n');
    stream.write_all(&line).await.unwrap();
}

/// Reads until one `\n`-terminated frame has arrived and returns it parsed.
async fn read_json(stream: &mut TcpStream) -> Value {
    let bytes = read_frame(stream).await;
    serde_json::from_slice(&bytes).unwrap()
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.unwrap();
        assert_ne!(n, 0, "connection closed before a full frame arrived");
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
    }
    buf
}

fn tokens(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(token, user)| (token.to_string(), user.to_string()))
        .collect()
}

#[tokio::test]
async fn hello_returns_success_without_disconnect() {
    let config = test_config(18101, 18102);
    let auth = Arc::new(MockAuthenticator::new(HashMap::new()));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut client = connect(18102).await;
    send_line(&mut client, &json!({"id": 1, "method": "RemoteProxy.Hello", "params": {}})).await;
    let resp = read_json(&mut client).await;

    assert_eq!(resp["status"], "success");
    assert!(resp["params"]["apiVersion"].is_string());

    // The connection must still be usable; a second request round trips.
    send_line(&mut client, &json!({"id": 2, "method": "RemoteProxy.Introspect", "params": {}})).await;
    let resp2 = read_json(&mut client).await;
    assert_eq!(resp2["status"], "success");

    engine.stop().await;
}

#[tokio::test]
async fn auth_success_pairs_two_clients_and_notifies_both() {
    let config = test_config(18111, 18112);
    let auth = Arc::new(MockAuthenticator::new(tokens(&[("shared-token", "user-1")])));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut a = connect(18112).await;
    let mut b = connect(18112).await;

    send_line(
        &mut a,
        &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
            "uuid": "uuid-a", "name": "client-a", "token": "shared-token", "nonce": "n1"
        }}),
    )
    .await;
    send_line(
        &mut b,
        &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
            "uuid": "uuid-b", "name": "client-b", "token": "shared-token", "nonce": "n1"
        }}),
    )
    .await;

    let resp_a = read_json(&mut a).await;
    let resp_b = read_json(&mut b).await;
    assert_eq!(resp_a["params"]["authenticationError"], "AuthenticationErrorNoError");
    assert_eq!(resp_b["params"]["authenticationError"], "AuthenticationErrorNoError");

    let note_a = tokio::time::timeout(Duration::from_millis(500), read_json(&mut a))
        .await
        .expect("client A should receive TunnelEstablished within 500ms");
    let note_b = tokio::time::timeout(Duration::from_millis(500), read_json(&mut b))
        .await
        .expect("client B should receive TunnelEstablished within 500ms");

    assert_eq!(note_a["notification"], "Authentication.TunnelEstablished");
    assert_eq!(note_a["params"]["clientName"], "client-b");
    assert_eq!(note_b["notification"], "Authentication.TunnelEstablished");
    assert_eq!(note_b["params"]["clientName"], "client-a");

    engine.stop().await;
}

#[tokio::test]
async fn relay_delivers_raw_bytes_verbatim_after_pairing() {
    let config = test_config(18121, 18122);
    let auth = Arc::new(MockAuthenticator::new(tokens(&[("shared-token", "user-1")])));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut a = connect(18122).await;
    let mut b = connect(18122).await;

    for (stream, uuid, name) in [(&mut a, "uuid-a", "client-a"), (&mut b, "uuid-b", "client-b")] {
        send_line(
            stream,
            &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
                "uuid": uuid, "name": name, "token": "shared-token", "nonce": "n1"
            }}),
        )
        .await;
        let _ = read_json(stream).await; // auth response
        let _ = read_json(stream).await; // TunnelEstablished
    }

    let payload = b"Hello from client one :-)";
    send_raw(&mut a, payload).await;
    let received = read_frame(&mut b).await;
    assert_eq!(received, payload);

    engine.stop().await;
}

#[tokio::test]
async fn token_mismatch_parks_both_clients() {
    let config = test_config(18131, 18132);
    let auth = Arc::new(MockAuthenticator::new(tokens(&[
        ("token-a", "user-1"),
        ("token-b", "user-1"),
    ])));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut a = connect(18132).await;
    let mut b = connect(18132).await;

    send_line(
        &mut a,
        &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
            "uuid": "uuid-a", "name": "client-a", "token": "token-a", "nonce": "n1"
        }}),
    )
    .await;
    send_line(
        &mut b,
        &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
            "uuid": "uuid-b", "name": "client-b", "token": "token-b", "nonce": "n1"
        }}),
    )
    .await;

    let _resp_a = read_json(&mut a).await;
    let _resp_b = read_json(&mut b).await;

    let no_notification = tokio::time::timeout(Duration::from_millis(300), read_json(&mut a)).await;
    assert!(
        no_notification.is_err(),
        "clients with mismatched tokens must not be paired"
    );

    engine.stop().await;
}

#[tokio::test]
async fn authenticate_call_timeout_disconnects_client() {
    let mut config = test_config(18141, 18142);
    config.call_timeout_secs = 1;
    let auth = Arc::new(MockAuthenticator::never_reply());
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut client = connect(18142).await;
    send_line(
        &mut client,
        &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
            "uuid": "uuid-a", "name": "client-a", "token": "whatever", "nonce": "n1"
        }}),
    )
    .await;

    let resp = tokio::time::timeout(Duration::from_millis(1500), read_json(&mut client))
        .await
        .expect("server must respond within one call timeout");
    assert_eq!(resp["status"], "error");

    let mut trailing = [0u8; 1];
    let closed = client.read(&mut trailing).await.unwrap();
    assert_eq!(closed, 0, "connection must be closed after the timeout error");

    engine.stop().await;
}

#[tokio::test]
async fn double_authenticate_is_rejected_and_disconnects() {
    let config = test_config(18151, 18152);
    let auth = Arc::new(MockAuthenticator::new(tokens(&[("shared-token", "user-1")])));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut a = connect(18152).await;
    let mut b = connect(18152).await;

    for (stream, uuid, name) in [(&mut a, "uuid-a", "client-a"), (&mut b, "uuid-b", "client-b")] {
        send_line(
            stream,
            &json!({"id": 1, "method": "Authentication.Authenticate", "params": {
                "uuid": uuid, "name": name, "token": "shared-token", "nonce": "n1"
            }}),
        )
        .await;
        let _ = read_json(stream).await;
        let _ = read_json(stream).await;
    }

    send_line(
        &mut a,
        &json!({"id": 2, "method": "Authentication.Authenticate", "params": {
            "uuid": "uuid-a", "name": "client-a", "token": "shared-token", "nonce": "n1"
        }}),
    )
    .await;
    let resp = read_json(&mut a).await;
    assert_eq!(resp["status"], "error");

    let mut trailing = [0u8; 1];
    let closed = a.read(&mut trailing).await.unwrap();
    assert_eq!(closed, 0, "connection must be closed after repeat authenticate");

    engine.stop().await;
}

#[tokio::test]
async fn malformed_frame_is_answered_and_closed() {
    let config = test_config(18161, 18162);
    let auth = Arc::new(MockAuthenticator::new(HashMap::new()));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    let mut client = connect(18162).await;
    send_raw(&mut client, b"not json at all").await;

    let resp = read_json(&mut client).await;
    assert_eq!(resp["id"], -1);
    assert_eq!(resp["status"], "error");

    let mut trailing = [0u8; 1];
    let closed = client.read(&mut trailing).await.unwrap();
    assert_eq!(closed, 0, "connection must be closed after a parse failure");

    engine.stop().await;
}

#[tokio::test]
async fn stop_then_start_restores_full_functionality() {
    let config = test_config(18171, 18172);
    let auth = Arc::new(MockAuthenticator::new(HashMap::new()));
    let engine = Engine::new(config, auth);

    engine.start().await.unwrap();
    engine.stop().await;
    engine.start().await.unwrap();

    let mut client = connect(18172).await;
    send_line(&mut client, &json!({"id": 1, "method": "RemoteProxy.Hello", "params": {}})).await;
    let resp = read_json(&mut client).await;
    assert_eq!(resp["status"], "success");

    engine.stop().await;
}

#[tokio::test]
async fn connection_cap_refuses_the_nplus1th_connection() {
    let mut config = test_config(18181, 18182);
    config.max_connections = 1;
    let auth = Arc::new(MockAuthenticator::new(HashMap::new()));
    let engine = Engine::new(config, auth);
    engine.start().await.unwrap();

    // First connection fills the only admitted slot and stays usable.
    let mut first = connect(18182).await;
    send_line(&mut first, &json!({"id": 1, "method": "RemoteProxy.Hello", "params": {}})).await;
    let resp = read_json(&mut first).await;
    assert_eq!(resp["status"], "success");

    // The (N+1)-th connection is refused by admission before any session
    // exists: the listener accepts the TCP handshake then closes it without
    // ever handing it to the dispatcher, so no Hello response ever arrives.
    let mut second = connect(18182).await;
    send_line(&mut second, &json!({"id": 1, "method": "RemoteProxy.Hello", "params": {}})).await;
    let mut byte = [0u8; 1];
    let read_result = tokio::time::timeout(Duration::from_millis(500), second.read(&mut byte))
        .await
        .expect("refused connection should close promptly, not hang");
    let n = read_result.unwrap_or(0);
    assert_eq!(n, 0, "admission-refused connection must be closed, never answered");

    // The first connection is unaffected by the refusal and keeps working.
    send_line(&mut first, &json!({"id": 2, "method": "RemoteProxy.Hello", "params": {}})).await;
    let resp2 = read_json(&mut first).await;
    assert_eq!(resp2["status"], "success");

    engine.stop().await;
}
