//! TLS configuration for the relay server.
//!
//! Builds a [`tokio_rustls::TlsAcceptor`] from a `remoteproxy_core` config
//! [`TlsMaterial`] selection, generating or loading certificate material as
//! needed.

use std::path::Path;
use std::sync::Arc;

use remoteproxy_core::config::TlsMaterial;
use rustls::pki_types::CertificateDer;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use super::certs::{generate_dev_bundle, write_dev_certs, CertError};

/// Build a [`TlsAcceptor`] for the given material. Returns `None` when TLS
/// is disabled.
pub fn build_tls_acceptor(
    material: &TlsMaterial,
    dev_cert_dir: &Path,
) -> Result<Option<TlsAcceptor>, TlsConfigError> {
    match material {
        TlsMaterial::Disabled => Ok(None),
        TlsMaterial::DevSelfSigned => {
            info!("generating dev TLS certificates");
            let bundle = generate_dev_bundle(&["localhost", "127.0.0.1", "0.0.0.0"])?;
            write_dev_certs(dev_cert_dir, &bundle)?;
            let acceptor = build_acceptor_from_pem(&bundle.server_cert_pem, &bundle.server_key_pem)?;
            info!(cert_dir = %dev_cert_dir.display(), "dev TLS enabled");
            Ok(Some(acceptor))
        }
        TlsMaterial::Custom {
            cert_path,
            key_path,
        } => {
            let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
                TlsConfigError::FileRead(format!(
                    "failed to read cert {}: {e}",
                    cert_path.display()
                ))
            })?;
            let key_pem = std::fs::read_to_string(key_path).map_err(|e| {
                TlsConfigError::FileRead(format!("failed to read key {}: {e}", key_path.display()))
            })?;
            let acceptor = build_acceptor_from_pem(&cert_pem, &key_pem)?;
            info!(
                cert = %cert_path.display(),
                key = %key_path.display(),
                "custom TLS enabled"
            );
            Ok(Some(acceptor))
        }
    }
}

fn build_acceptor_from_pem(cert_pem: &str, key_pem: &str) -> Result<TlsAcceptor, TlsConfigError> {
    let cert_chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| TlsConfigError::Parse(format!("invalid certificate PEM: {e}")))?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| TlsConfigError::Parse(format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| TlsConfigError::Parse("no private key found in PEM".to_string()))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| TlsConfigError::Parse(format!("invalid certificate/key pair: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("certificate generation error: {0}")]
    CertGeneration(String),

    #[error("file read error: {0}")]
    FileRead(String),

    #[error("certificate/key parse error: {0}")]
    Parse(String),
}

impl From<CertError> for TlsConfigError {
    fn from(e: CertError) -> Self {
        Self::CertGeneration(e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn disabled_returns_none() {
        let dir = std::env::temp_dir().join("remoteproxy-tls-test-disabled");
        let result = build_tls_acceptor(&TlsMaterial::Disabled, &dir).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn dev_self_signed_returns_acceptor() {
        let dir = std::env::temp_dir().join("remoteproxy-tls-test-dev");
        let _ = std::fs::remove_dir_all(&dir);

        let result = build_tls_acceptor(&TlsMaterial::DevSelfSigned, &dir).unwrap();
        assert!(result.is_some());

        assert!(dir.join("ca.pem").exists());
        assert!(dir.join("server.pem").exists());
        assert!(dir.join("server-key.pem").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn custom_missing_cert_returns_error() {
        let material = TlsMaterial::Custom {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        let dir = std::env::temp_dir().join("remoteproxy-tls-test-missing");
        assert!(build_tls_acceptor(&material, &dir).is_err());
    }
}
