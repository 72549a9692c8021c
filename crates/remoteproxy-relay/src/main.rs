//! remoteproxy relay server entry point.
//!
//! Parses configuration (CLI + env + optional TOML file, layered per
//! `remoteproxy_core::config`), initializes tracing, constructs the
//! configured authenticator backend, and drives the engine's lifecycle
//! until a shutdown signal arrives.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use remoteproxy_core::config::{AuthBackend, CliArgs};
use remoteproxy_relay::auth::{Authenticator, HttpAuthenticator, MockAuthenticator};
use remoteproxy_relay::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = remoteproxy_core::config::resolve(args)?;

    remoteproxy_core::init_tracing(&config.log_level, config.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server_name = %config.server_name,
        ws_addr = %config.ws_listen_addr,
        tcp_addr = %config.tcp_listen_addr,
        developer_mode = config.developer_mode,
        "starting remoteproxy-relay"
    );

    let authenticator: Arc<dyn Authenticator> = match config.auth_backend {
        AuthBackend::Http => {
            let url = config
                .auth_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("auth_url is required for the http backend"))?;
            Arc::new(HttpAuthenticator::new(url))
        }
        AuthBackend::Mock => {
            info!("using mock authenticator; do not use in production");
            Arc::new(MockAuthenticator::new(HashMap::new()))
        }
    };

    let engine = Engine::new(config, authenticator);
    engine.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    engine.stop().await;
    info!("remoteproxy-relay stopped");
    Ok(())
}
