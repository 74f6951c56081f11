//! Per-client connection handling.
//!
//! ```text
//! bytes ──FrameBuffer──> frame ──Envelope──┬─ insecure ─> bootstrap ───┐
//!                                          └─ secure ───> decapsulate ─┤
//!                                                                      │
//!                        ┌── verify peer certificate (optional) <──────┘
//!                        v
//!                      route ──> RequestHandler ──> encapsulate ──> "\n\n" frame
//! ```
//!
//! Each connection owns its [`SecureSession`]. The trust store is shared by
//! every connection behind an async mutex, so cache reads and writes are
//! serialised.
//!
//! A bad frame (unparseable, undecryptable, out of phase) is logged and
//! dropped; the connection stays up. A cipher-spec mismatch ends it.

use std::sync::Arc;

use secim_core::{Environment, Envelope, Inbound, RevocationFetcher, SecureSession, TrustStore};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    config::ServerConfig,
    error::ServerError,
    router::{RequestHandler, RouteError, route},
    transport::{FrameBuffer, encode_frame},
};

/// Bytes read from the socket per call.
const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Trust store shared by every connection.
pub type SharedTrust<F, E> = Arc<Mutex<TrustStore<F, E>>>;

/// Per-connection limits and switches taken from [`ServerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Largest HKDF iteration count accepted from a peer
    pub max_iterations: u32,
    /// Validate the certificate on every secure message
    pub verify_peers: bool,
    /// Inbound buffer cap
    pub max_frame_bytes: usize,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            verify_peers: config.verify_peers,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

/// One client's session and the shared services it talks to.
pub struct Connection<H, F, E> {
    session: SecureSession<E>,
    trust: SharedTrust<F, E>,
    handler: Arc<H>,
    settings: ConnectionSettings,
}

impl<H, F, E> Connection<H, F, E>
where
    H: RequestHandler,
    F: RevocationFetcher,
    E: Environment,
{
    /// New connection presenting the trust store's identity certificate.
    pub async fn new(
        trust: SharedTrust<F, E>,
        handler: Arc<H>,
        env: E,
        settings: ConnectionSettings,
    ) -> Self {
        let identity = trust.lock().await.identity().clone();
        let session =
            SecureSession::new(env, &identity).with_max_iterations(settings.max_iterations);
        Self { session, trust, handler, settings }
    }

    /// The connection's session.
    pub fn session(&self) -> &SecureSession<E> {
        &self.session
    }

    /// Serve `stream` until the peer disconnects or a fatal error occurs.
    pub async fn run<S>(mut self, mut stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frames = FrameBuffer::new(self.settings.max_frame_bytes);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];

        loop {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                tracing::debug!("peer closed connection");
                return Ok(());
            }

            if let Err(err) = frames.extend(&chunk[..read]) {
                tracing::error!(error = %err, "client buffer exceeds limit, backlog dropped");
            }

            while let Some(frame) = frames.next_frame() {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping frame");
                        continue;
                    },
                };

                if let Some(reply) = self.handle_frame(&frame).await? {
                    stream.write_all(&encode_frame(&reply)).await?;
                }
            }
        }
    }

    /// Process one inbound frame, returning the encrypted reply if any.
    ///
    /// # Errors
    ///
    /// `Protocol` when the frame is fatal to the session; the caller must
    /// close the connection.
    pub async fn handle_frame(&mut self, frame: &str) -> Result<Option<String>, ServerError> {
        let envelope = match Envelope::from_json(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "dropping frame");
                return Ok(None);
            },
        };

        let inbound = match envelope {
            Envelope::Insecure(hello) => self.session.bootstrap(&hello),
            Envelope::Secure(message) => self.session.decapsulate(&message),
        };

        let inbound = match inbound {
            Ok(inbound) => inbound,
            Err(err) if err.is_fatal() => {
                tracing::warn!(error = %err, "closing session");
                return Err(err.into());
            },
            Err(err) => {
                tracing::warn!(error = %err, "dropping message");
                return Ok(None);
            },
        };

        if !self.peer_is_trusted(&inbound).await {
            return self
                .reply(&json!({"error": "certificate not trusted"}), inbound.token)
                .map(Some);
        }

        let response = match route(&inbound.request) {
            Ok(kind) => {
                tracing::debug!(kind = %kind, "handling request");
                self.handler.handle(kind, &inbound.request, inbound.peer_certificate.as_ref())
            },
            Err(RouteError::UnknownKind(kind)) => {
                tracing::warn!(kind = %kind, "unknown request type");
                json!({"error": "unknown request"})
            },
            Err(err) => {
                tracing::warn!(error = %err, "dropping request");
                return Ok(None);
            },
        };

        self.reply(&response, inbound.token).map(Some)
    }

    async fn peer_is_trusted(&self, inbound: &Inbound) -> bool {
        if !self.settings.verify_peers {
            return true;
        }
        let Some(certificate) = &inbound.peer_certificate else {
            return true;
        };

        let trusted = self.trust.lock().await.validate(certificate).await;
        if !trusted {
            tracing::warn!(peer = %certificate.id(), "untrusted peer certificate");
        }
        trusted
    }

    fn reply(&mut self, response: &Value, token: Value) -> Result<String, ServerError> {
        let message = self
            .session
            .encapsulate(response, token)
            .inspect_err(|err| tracing::error!(error = %err, "cannot encrypt reply"))?;
        Ok(Envelope::Secure(message).to_json())
    }
}
