//! remoteproxy core library
//!
//! Shared functionality used by the relay binary and, in the future, any
//! client implementation:
//! - Configuration resolution and hierarchy
//! - JSON-RPC wire DTOs
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod tracing_init;

pub use error::{Error, Result};
pub use tracing_init::init_tracing;
