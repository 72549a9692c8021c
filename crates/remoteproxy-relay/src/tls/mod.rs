//! TLS configuration and certificate generation for the relay server.

pub mod certs;
pub mod config;

pub use certs::{generate_dev_bundle, CertBundle, CertError};
pub use config::{build_tls_acceptor, TlsConfigError};
