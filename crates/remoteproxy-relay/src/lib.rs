//! remoteproxy relay server library.
//!
//! Implements the server side of the remote tunneling proxy: pairs two
//! authenticated clients by `(userId, nonce, token)` into a bidirectional
//! byte tunnel over a websocket or raw-TLS-TCP transport, dispatching
//! JSON-RPC requests until a tunnel forms and bytes start flowing verbatim.

pub mod admission;
pub mod auth;
pub mod client;
pub mod dispatch;
pub mod engine;
pub mod handlers;
pub mod monitor;
pub mod registry;
pub mod stats;
pub mod tls;
pub mod transport;

pub use engine::{Engine, EngineError};
