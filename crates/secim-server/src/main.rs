//! Secure IM server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve from ./certs, ./crls and ./user_certs
//! secim-server --bind 0.0.0.0:8080
//!
//! # Explicit state directory, skip per-message certificate checks
//! secim-server --state-dir /srv/secim --no-verify-peers
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use secim_core::TrustConfig;
use secim_server::{
    Server, ServerConfig,
    config::{DEFAULT_BIND_ADDRESS, DEFAULT_MAX_FRAME_BYTES, DEFAULT_OPENSSL, DEFAULT_STATE_DIR},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Secure IM server
#[derive(Parser, Debug)]
#[command(name = "secim-server")]
#[command(about = "Secure instant-messaging server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = DEFAULT_BIND_ADDRESS)]
    bind: String,

    /// Root holding certs/, crls/ and user_certs/
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Certificate directory (repeatable; replaces <state-dir>/certs)
    #[arg(long = "cert-dir")]
    cert_dirs: Vec<PathBuf>,

    /// Downloaded CRL directory (wiped at startup)
    #[arg(long)]
    crl_dir: Option<PathBuf>,

    /// Directory for copies of peer certificates
    #[arg(long)]
    user_cert_dir: Option<PathBuf>,

    /// CA bundle used to check OCSP responses
    #[arg(long)]
    ca_bundle: Option<PathBuf>,

    /// Subject label of the server's own certificate
    #[arg(long)]
    identity_label: Option<String>,

    /// Subject label of the server's issuing CA
    #[arg(long)]
    ca_label: Option<String>,

    /// Seconds allowed per CRL download or OCSP query
    #[arg(long, default_value = "10")]
    fetch_timeout: u64,

    /// OCSP client binary
    #[arg(long, default_value = DEFAULT_OPENSSL)]
    openssl: PathBuf,

    /// Largest HKDF iteration count a client may request
    #[arg(long, default_value_t = secim_crypto::MAX_ITERATIONS)]
    max_iterations: u32,

    /// Per-client inbound buffer cap in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    /// Do not validate peer certificates on secure messages
    #[arg(long)]
    no_verify_peers: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut trust = TrustConfig::under(&self.state_dir);
        if !self.cert_dirs.is_empty() {
            trust.certificate_dirs = self.cert_dirs;
        }
        if let Some(dir) = self.crl_dir {
            trust.crl_dir = dir;
        }
        if let Some(dir) = self.user_cert_dir {
            trust.user_cert_dir = dir;
        }
        if let Some(path) = self.ca_bundle {
            trust.ca_bundle = path;
        }
        if let Some(label) = self.identity_label {
            trust.identity_label = label;
        }
        if let Some(label) = self.ca_label {
            trust.ca_label = label;
        }

        ServerConfig {
            bind_address: self.bind,
            trust,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            openssl: self.openssl,
            max_iterations: self.max_iterations,
            verify_peers: !self.no_verify_peers,
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Secure IM server starting");

    let config = args.into_config();
    if !config.verify_peers {
        tracing::warn!("Peer certificate validation disabled");
    }

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
