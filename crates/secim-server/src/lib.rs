//! Secure IM server.
//!
//! Accepts TCP clients, frames their traffic, runs one
//! [`SecureSession`](secim_core::SecureSession) per client and consults a
//! shared [`TrustStore`] before handing decrypted requests to a
//! [`RequestHandler`].
//!
//! # Components
//!
//! - [`Server`]: accept loop, one task per client
//! - [`Connection`]: per-client framing, session and dispatch
//! - [`SystemFetcher`]: CRLs over HTTP, OCSP via `openssl ocsp`
//! - [`SystemEnv`]: production environment (system clock, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
mod error;
pub mod fetcher;
pub mod router;
mod system_env;
pub mod transport;

use std::{net::SocketAddr, sync::Arc};

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionSettings, SharedTrust};
pub use error::ServerError;
pub use fetcher::SystemFetcher;
pub use router::{HandshakeOnly, RequestHandler, RequestKind};
use secim_core::TrustStore;
pub use system_env::SystemEnv;
use tokio::{net::TcpListener, sync::Mutex};

/// Production secure IM server.
pub struct Server<H = HandshakeOnly> {
    listener: TcpListener,
    trust: SharedTrust<SystemFetcher, SystemEnv>,
    handler: Arc<H>,
    settings: ConnectionSettings,
    env: SystemEnv,
}

impl Server<HandshakeOnly> {
    /// Load the trust store and bind, answering only handshakes.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_handler(config, HandshakeOnly).await
    }
}

impl<H: RequestHandler> Server<H> {
    /// Load the trust store and bind, dispatching requests to `handler`.
    pub async fn bind_with_handler(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {e}", config.bind_address))
        })?;

        let env = SystemEnv::new();
        let fetcher = SystemFetcher::new(config.fetch_timeout, config.openssl.clone());
        let trust = TrustStore::load(config.trust.clone(), fetcher, env)?;
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            trust: Arc::new(Mutex::new(trust)),
            handler: Arc::new(handler),
            settings: ConnectionSettings::from(&config),
            env,
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the shared trust store.
    pub fn trust(&self) -> SharedTrust<SystemFetcher, SystemEnv> {
        Arc::clone(&self.trust)
    }

    /// Accept clients until the process is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "server listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let trust = Arc::clone(&self.trust);
                    let handler = Arc::clone(&self.handler);
                    let settings = self.settings;
                    let env = self.env;

                    tokio::spawn(async move {
                        tracing::info!(%peer, "client connected");
                        let connection = Connection::new(trust, handler, env, settings).await;
                        match connection.run(stream).await {
                            Ok(()) => tracing::info!(%peer, "client disconnected"),
                            Err(e) => tracing::warn!(%peer, error = %e, "connection closed"),
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}
