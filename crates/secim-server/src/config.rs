//! Server runtime configuration.

use std::{path::PathBuf, time::Duration};

use secim_core::TrustConfig;
use secim_crypto::MAX_ITERATIONS;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default root for certificates, CRLs and peer certificates.
pub const DEFAULT_STATE_DIR: &str = ".";

/// Default time allowed for one CRL download or OCSP query.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default OCSP client binary.
pub const DEFAULT_OPENSSL: &str = "openssl";

/// Largest inbound backlog kept per client (64 KiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Certificate, CRL and peer-certificate locations
    pub trust: TrustConfig,
    /// Time allowed for one CRL download or OCSP query
    pub fetch_timeout: Duration,
    /// `openssl` binary used for OCSP queries
    pub openssl: PathBuf,
    /// Largest HKDF iteration count a client may request
    pub max_iterations: u32,
    /// Validate the certificate on every secure message
    pub verify_peers: bool,
    /// Per-client inbound buffer cap
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            trust: TrustConfig::under(DEFAULT_STATE_DIR),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            openssl: PathBuf::from(DEFAULT_OPENSSL),
            max_iterations: MAX_ITERATIONS,
            verify_peers: true,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
