//! Configuration resolution for the remote tunneling proxy.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. TOML config file (`--config`, optional)
//! 3. Environment variables (`REMOTEPROXY_*`)
//! 4. CLI arguments (highest priority; absorbs the environment layer via
//!    clap's `env` attribute, so flags and env vars share one definition)

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// TLS material selection for a listener.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMaterial {
    /// No TLS. Only ever valid together with developer mode.
    #[default]
    Disabled,
    /// Self-signed certificates generated at startup, for local testing.
    DevSelfSigned,
    /// Certificate and key loaded from disk.
    Custom {
        /// Path to a PEM-encoded certificate chain.
        cert_path: PathBuf,
        /// Path to a PEM-encoded private key.
        key_path: PathBuf,
    },
}

/// Which authenticator implementation the relay should construct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthBackend {
    /// Authenticate against a remote HTTPS identity provider.
    #[default]
    Http,
    /// Canned in-memory authenticator, for tests and local development.
    Mock,
}

/// Fully resolved configuration for a running proxy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfiguration {
    /// Name advertised in `RemoteProxy.Hello` responses.
    pub server_name: String,

    /// Address the websocket transport binds to.
    pub ws_listen_addr: SocketAddr,
    /// TLS material for the websocket transport.
    pub ws_tls: TlsMaterial,

    /// Address the raw-TCP transport binds to.
    pub tcp_listen_addr: SocketAddr,
    /// TLS material for the raw-TCP transport.
    pub tcp_tls: TlsMaterial,

    /// Path to the monitor's UNIX domain socket.
    pub monitor_socket_path: PathBuf,

    /// Timeout for an async JSON-RPC call before the dispatcher gives up.
    pub call_timeout_secs: u64,
    /// Time a client has to complete `Authentication.Authenticate` before disconnect.
    pub auth_timeout_secs: u64,
    /// Time a tunneled pair may sit idle (zero bytes both ways) before disconnect.
    /// Zero disables the timeout.
    pub relay_inactivity_timeout_secs: u64,

    /// Maximum concurrent connections, globally.
    pub max_connections: usize,
    /// Maximum concurrent connections from a single peer address.
    pub max_connections_per_ip: usize,

    /// Disables TLS enforcement and loosens websocket origin checks.
    pub developer_mode: bool,

    /// Authenticator implementation to construct.
    pub auth_backend: AuthBackend,
    /// Base URL of the HTTPS identity provider, required when `auth_backend = Http`.
    pub auth_url: Option<String>,

    /// Log level filter, passed to `tracing_subscriber::EnvFilter` when unset by `RUST_LOG`.
    pub log_level: String,
    /// Emit structured JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl Default for ProxyConfiguration {
    fn default() -> Self {
        Self {
            server_name: "remoteproxy".to_string(),
            ws_listen_addr: "0.0.0.0:443".parse().unwrap_or_else(|_| {
                unreachable!("default listen address is a valid SocketAddr literal")
            }),
            ws_tls: TlsMaterial::Disabled,
            tcp_listen_addr: "0.0.0.0:1212".parse().unwrap_or_else(|_| {
                unreachable!("default listen address is a valid SocketAddr literal")
            }),
            tcp_tls: TlsMaterial::Disabled,
            monitor_socket_path: PathBuf::from("/tmp/remoteproxy-monitor.sock"),
            call_timeout_secs: 10,
            auth_timeout_secs: 30,
            relay_inactivity_timeout_secs: 0,
            max_connections: 10_000,
            max_connections_per_ip: 50,
            developer_mode: false,
            auth_backend: AuthBackend::Mock,
            auth_url: None,
            log_level: "remoteproxy=info".to_string(),
            log_json: false,
        }
    }
}

impl ProxyConfiguration {
    /// Validate cross-field invariants that serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_secs == 0 {
            return Err(Error::Config("call_timeout_secs must be > 0".to_string()));
        }
        if self.auth_timeout_secs == 0 {
            return Err(Error::Config("auth_timeout_secs must be > 0".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be > 0".to_string()));
        }
        if self.max_connections_per_ip == 0 {
            return Err(Error::Config(
                "max_connections_per_ip must be > 0".to_string(),
            ));
        }
        if self.auth_backend == AuthBackend::Http && self.auth_url.is_none() {
            return Err(Error::Config(
                "auth_url is required when auth_backend = http".to_string(),
            ));
        }
        if !self.developer_mode
            && (matches!(self.ws_tls, TlsMaterial::Disabled)
                || matches!(self.tcp_tls, TlsMaterial::Disabled))
        {
            return Err(Error::Config(
                "TLS cannot be disabled outside developer_mode".to_string(),
            ));
        }
        Ok(())
    }
}

/// A partial, file-sourced overlay. Every field is optional so a TOML file
/// only needs to mention what it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFileOverlay {
    pub server_name: Option<String>,
    pub ws_listen_addr: Option<SocketAddr>,
    pub tcp_listen_addr: Option<SocketAddr>,
    pub monitor_socket_path: Option<PathBuf>,
    pub call_timeout_secs: Option<u64>,
    pub auth_timeout_secs: Option<u64>,
    pub relay_inactivity_timeout_secs: Option<u64>,
    pub max_connections: Option<usize>,
    pub max_connections_per_ip: Option<usize>,
    pub developer_mode: Option<bool>,
    pub auth_backend: Option<AuthBackend>,
    pub auth_url: Option<String>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

/// Command-line arguments, doubling as the environment-variable layer via
/// clap's `env` attribute on each field.
#[derive(Debug, Parser)]
#[command(name = "remoteproxy-relay")]
#[command(version, about = "Remote tunneling proxy relay server")]
pub struct CliArgs {
    /// Path to a TOML configuration file.
    #[arg(long, env = "REMOTEPROXY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "REMOTEPROXY_SERVER_NAME")]
    pub server_name: Option<String>,

    #[arg(long, env = "REMOTEPROXY_WS_LISTEN_ADDR")]
    pub ws_listen_addr: Option<SocketAddr>,

    #[arg(long, env = "REMOTEPROXY_TCP_LISTEN_ADDR")]
    pub tcp_listen_addr: Option<SocketAddr>,

    #[arg(long, env = "REMOTEPROXY_MONITOR_SOCKET_PATH")]
    pub monitor_socket_path: Option<PathBuf>,

    #[arg(long, env = "REMOTEPROXY_CALL_TIMEOUT_SECS")]
    pub call_timeout_secs: Option<u64>,

    #[arg(long, env = "REMOTEPROXY_AUTH_TIMEOUT_SECS")]
    pub auth_timeout_secs: Option<u64>,

    #[arg(long, env = "REMOTEPROXY_RELAY_IDLE_TIMEOUT_SECS")]
    pub relay_idle_timeout_secs: Option<u64>,

    #[arg(long, env = "REMOTEPROXY_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    #[arg(long, env = "REMOTEPROXY_MAX_CONNECTIONS_PER_IP")]
    pub max_connections_per_ip: Option<usize>,

    /// Bypasses TLS and loosens websocket origin checks. Local testing only.
    #[arg(long, env = "REMOTEPROXY_DEVELOPER_MODE")]
    pub developer_mode: bool,

    #[arg(long, value_enum, env = "REMOTEPROXY_AUTH_BACKEND")]
    pub auth_backend: Option<AuthBackendArg>,

    #[arg(long, env = "REMOTEPROXY_AUTH_URL")]
    pub auth_url: Option<String>,

    /// Path to a PEM certificate chain, used for both listeners unless a
    /// config file specifies them individually.
    #[arg(long, env = "REMOTEPROXY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,
    /// Path to a PEM private key, paired with `--tls-cert`.
    #[arg(long, env = "REMOTEPROXY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    #[arg(long, env = "REMOTEPROXY_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "REMOTEPROXY_LOG_JSON")]
    pub log_json: bool,
}

/// Mirrors [`AuthBackend`] for clap's `value_enum`, since the latter needs a
/// type that implements `clap::ValueEnum` directly on the CLI surface.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum AuthBackendArg {
    Http,
    Mock,
}

impl From<AuthBackendArg> for AuthBackend {
    fn from(v: AuthBackendArg) -> Self {
        match v {
            AuthBackendArg::Http => Self::Http,
            AuthBackendArg::Mock => Self::Mock,
        }
    }
}

/// Resolve a [`ProxyConfiguration`] from defaults, an optional TOML file, and
/// parsed CLI arguments (which themselves already absorbed environment
/// variables through clap).
pub fn resolve(args: CliArgs) -> Result<ProxyConfiguration> {
    let mut config = ProxyConfiguration::default();

    if let Some(path) = &args.config {
        let overlay = load_overlay(path)?;
        apply_overlay(&mut config, overlay);
    }

    apply_cli_args(&mut config, args)?;
    config.validate()?;
    Ok(config)
}

fn load_overlay(path: &std::path::Path) -> Result<ConfigFileOverlay> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

fn apply_overlay(config: &mut ProxyConfiguration, overlay: ConfigFileOverlay) {
    if let Some(v) = overlay.server_name {
        config.server_name = v;
    }
    if let Some(v) = overlay.ws_listen_addr {
        config.ws_listen_addr = v;
    }
    if let Some(v) = overlay.tcp_listen_addr {
        config.tcp_listen_addr = v;
    }
    if let Some(v) = overlay.monitor_socket_path {
        config.monitor_socket_path = v;
    }
    if let Some(v) = overlay.call_timeout_secs {
        config.call_timeout_secs = v;
    }
    if let Some(v) = overlay.auth_timeout_secs {
        config.auth_timeout_secs = v;
    }
    if let Some(v) = overlay.relay_inactivity_timeout_secs {
        config.relay_inactivity_timeout_secs = v;
    }
    if let Some(v) = overlay.max_connections {
        config.max_connections = v;
    }
    if let Some(v) = overlay.max_connections_per_ip {
        config.max_connections_per_ip = v;
    }
    if let Some(v) = overlay.developer_mode {
        config.developer_mode = v;
    }
    if let Some(v) = overlay.auth_backend {
        config.auth_backend = v;
    }
    if overlay.auth_url.is_some() {
        config.auth_url = overlay.auth_url;
    }
    if let Some(v) = overlay.log_level {
        config.log_level = v;
    }
    if let Some(v) = overlay.log_json {
        config.log_json = v;
    }
}

fn apply_cli_args(config: &mut ProxyConfiguration, args: CliArgs) -> Result<()> {
    if let Some(v) = args.server_name {
        config.server_name = v;
    }
    if let Some(v) = args.ws_listen_addr {
        config.ws_listen_addr = v;
    }
    if let Some(v) = args.tcp_listen_addr {
        config.tcp_listen_addr = v;
    }
    if let Some(v) = args.monitor_socket_path {
        config.monitor_socket_path = v;
    }
    if let Some(v) = args.call_timeout_secs {
        config.call_timeout_secs = v;
    }
    if let Some(v) = args.auth_timeout_secs {
        config.auth_timeout_secs = v;
    }
    if let Some(v) = args.relay_idle_timeout_secs {
        config.relay_inactivity_timeout_secs = v;
    }
    if let Some(v) = args.max_connections {
        config.max_connections = v;
    }
    if let Some(v) = args.max_connections_per_ip {
        config.max_connections_per_ip = v;
    }
    if args.developer_mode {
        config.developer_mode = true;
    }
    if let Some(v) = args.auth_backend {
        config.auth_backend = v.into();
    }
    if args.auth_url.is_some() {
        config.auth_url = args.auth_url;
    }
    if let Some(v) = args.log_level {
        config.log_level = v;
    }
    if args.log_json {
        config.log_json = true;
    }

    match (args.tls_cert, args.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let material = TlsMaterial::Custom {
                cert_path,
                key_path,
            };
            config.ws_tls = material.clone();
            config.tcp_tls = material;
        }
        (None, None) => {
            if config.developer_mode
                && matches!(config.ws_tls, TlsMaterial::Disabled)
                && matches!(config.tcp_tls, TlsMaterial::Disabled)
            {
                config.ws_tls = TlsMaterial::DevSelfSigned;
                config.tcp_tls = TlsMaterial::DevSelfSigned;
            }
        }
        _ => {
            return Err(Error::Config(
                "--tls-cert and --tls-key must be given together".to_string(),
            ));
        }
    }

    Ok(())
}
