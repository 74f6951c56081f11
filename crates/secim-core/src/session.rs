//! Per-connection secure session.
//!
//! A [`SecureSession`] ratchets a fresh P-384 key pair and salt into every
//! message it sends, and keys every message it receives against the pair it
//! last sent.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized ──bootstrap──> AwaitingPeerInit ──encapsulate──> Established
//!       │                                                        ▲    │
//!       └──initiate──> Initiated ──decapsulate───────────────────┘    │
//!                                                                     │
//!                         encapsulate / decapsulate ◄─────────────────┘
//! ```
//!
//! The responder (server) side is driven by `bootstrap`; `initiate` drives
//! the complementary side and exists so both ends of the protocol share one
//! implementation.
//!
//! # Ratchet
//!
//! ```text
//! encapsulate: key = KDF(new pair, peer pub,     new salt  || peer salt)
//! decapsulate: key = KDF(last pair, msg pub,     msg salt  || own salt)
//! ```
//!
//! Peer values from a received message are committed only once it has
//! decrypted, so a corrupt message leaves the session as it was.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use secim_crypto::{
    CipherSuite, EphemeralKeyPair, MAX_ITERATIONS, PublicKey, SALT_SIZE, build_cipher,
    decode_public_value, derive_session_key, generate_salt,
};
use serde_json::{Value, json};

use crate::{
    env::Environment,
    envelope::{
        BootstrapSecData, Envelope, InsecureMessage, SecData, SecureMessage, SecurePayload,
    },
    error::ProtocolError,
    trust::Certificate,
};

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing exchanged yet
    Uninitialized,
    /// Bootstrap sent, waiting for the first encrypted reply
    Initiated,
    /// Bootstrap received, no reply sent yet
    AwaitingPeerInit,
    /// Keys ratchet on every message
    Established,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Plaintext request object
    pub request: Value,
    /// Correlation token, echoed on the reply
    pub token: Value,
    /// Certificate attached by the sender (secure messages only)
    pub peer_certificate: Option<Certificate>,
}

/// Protocol state for one connection.
pub struct SecureSession<E> {
    env: E,
    certificate: String,
    phase: SessionPhase,
    suite: Option<CipherSuite>,
    iterations: u32,
    max_iterations: u32,
    own_pair: Option<EphemeralKeyPair>,
    own_salt: [u8; SALT_SIZE],
    peer_public: Option<PublicKey>,
    peer_salt: Vec<u8>,
}

impl<E: Environment> SecureSession<E> {
    /// New session presenting `certificate` on every secure message.
    pub fn new(env: E, certificate: &Certificate) -> Self {
        Self {
            env,
            certificate: certificate.to_wire(),
            phase: SessionPhase::Uninitialized,
            suite: None,
            iterations: 0,
            max_iterations: MAX_ITERATIONS,
            own_pair: None,
            own_salt: [0u8; SALT_SIZE],
            peer_public: None,
            peer_salt: Vec::new(),
        }
    }

    /// Refuse peer iteration counts above `max`, on bootstrap and on every
    /// secure message. Capped at [`MAX_ITERATIONS`].
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.min(MAX_ITERATIONS);
        self
    }

    /// Largest iteration count accepted from the peer.
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Negotiated suite, once known.
    pub fn suite(&self) -> Option<&CipherSuite> {
        self.suite.as_ref()
    }

    /// HKDF iteration count in force.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Newest public value received from the peer.
    pub fn peer_public(&self) -> Option<&PublicKey> {
        self.peer_public.as_ref()
    }

    /// Newest salt received from the peer.
    pub fn peer_salt(&self) -> &[u8] {
        &self.peer_salt
    }

    /// Salt of our last send.
    pub fn own_salt(&self) -> &[u8; SALT_SIZE] {
        &self.own_salt
    }

    /// Open a session from the initiating side.
    ///
    /// Mints the first pair and salt and returns the bootstrap envelope.
    pub fn initiate(
        &mut self,
        suite: CipherSuite,
        iterations: u32,
        token: Value,
    ) -> Result<Envelope, ProtocolError> {
        if self.phase != SessionPhase::Uninitialized {
            return Err(self.invalid_state("initiate"));
        }
        check_iterations(iterations, MAX_ITERATIONS)?;

        let mut rng = self.env.rng();
        let pair = EphemeralKeyPair::generate(&mut rng);
        let salt = generate_salt(&mut rng);

        let envelope = Envelope::Insecure(InsecureMessage {
            cipher_spec: Some(suite.as_str().to_string()),
            secdata: BootstrapSecData {
                dhpubvalue: pair.encoded_public(),
                salt: STANDARD.encode(salt),
                index: iterations,
            },
            nounce: token,
        });

        self.suite = Some(suite);
        self.iterations = iterations;
        self.own_pair = Some(pair);
        self.own_salt = salt;
        self.phase = SessionPhase::Initiated;
        Ok(envelope)
    }

    /// Accept an unauthenticated bootstrap.
    ///
    /// Stores the peer's suite, public value, salt and iteration count and
    /// yields a synthetic `{"type": "init"}` request. A `null` suite keeps
    /// the one already negotiated. A repeated bootstrap starts over.
    pub fn bootstrap(&mut self, message: &InsecureMessage) -> Result<Inbound, ProtocolError> {
        if self.phase == SessionPhase::Initiated {
            return Err(self.invalid_state("bootstrap"));
        }

        let suite = match (&message.cipher_spec, &self.suite) {
            (Some(spec), _) => CipherSuite::parse(spec)
                .map_err(|e| ProtocolError::malformed(format!("cipher_spec: {e}")))?,
            (None, Some(current)) => current.clone(),
            (None, None) => return Err(ProtocolError::malformed("no cipher suite negotiated")),
        };
        let peer_public = decode_public_value(&message.secdata.dhpubvalue)
            .map_err(|e| ProtocolError::malformed(format!("dhpubvalue: {e}")))?;
        let peer_salt = decode_field("salt", &message.secdata.salt)?;
        check_iterations(message.secdata.index, self.max_iterations)
            .map_err(|e| ProtocolError::malformed(format!("index: {e}")))?;

        tracing::debug!(suite = %suite, iterations = message.secdata.index, "bootstrap accepted");

        self.suite = Some(suite);
        self.iterations = message.secdata.index;
        self.peer_public = Some(peer_public);
        self.peer_salt = peer_salt;
        self.own_pair = None;
        self.phase = SessionPhase::AwaitingPeerInit;

        Ok(Inbound {
            request: json!({"type": "init"}),
            token: message.nounce.clone(),
            peer_certificate: None,
        })
    }

    /// Encrypt `plaintext` under a freshly ratcheted key.
    pub fn encapsulate(
        &mut self,
        plaintext: &Value,
        token: Value,
    ) -> Result<SecureMessage, ProtocolError> {
        if !matches!(self.phase, SessionPhase::AwaitingPeerInit | SessionPhase::Established) {
            return Err(self.invalid_state("encapsulate"));
        }
        let (Some(suite), Some(peer_public)) = (&self.suite, &self.peer_public) else {
            return Err(self.invalid_state("encapsulate"));
        };

        let mut rng = self.env.rng();
        let pair = EphemeralKeyPair::generate(&mut rng);
        let salt = generate_salt(&mut rng);

        let key = derive_session_key(
            &pair,
            peer_public,
            &salt,
            &self.peer_salt,
            suite.aes.key_size,
            suite.hash,
            self.iterations,
        )?;
        let cipher = build_cipher(&key, suite.aes.mode, None, &mut rng)?;

        let Ok(serialized) = serde_json::to_vec(plaintext) else {
            unreachable!("serde_json::Value always serialises");
        };
        let ciphertext = cipher.encrypt(&serialized)?;

        let payload = SecurePayload {
            message: STANDARD.encode(ciphertext),
            nounce: token,
            secdata: SecData {
                dhpubvalue: pair.encoded_public(),
                salt: STANDARD.encode(salt),
                iv: STANDARD.encode(cipher.iv()),
                index: self.iterations,
            },
        };
        let Ok(payload) = serde_json::to_vec(&payload) else {
            unreachable!("payload contains only strings, integers and JSON values");
        };

        let message = SecureMessage {
            payload: STANDARD.encode(payload),
            signature: None,
            certificate: self.certificate.clone(),
            cipher_spec: suite.as_str().to_string(),
        };

        self.own_pair = Some(pair);
        self.own_salt = salt;
        self.phase = SessionPhase::Established;
        Ok(message)
    }

    /// Decrypt a secure message keyed against our last send.
    ///
    /// # Errors
    ///
    /// - `CipherSpecMismatch`: fatal, checked before anything else is read
    /// - `MalformedEnvelope`: undecodable payload, key, salt, IV or
    ///   certificate
    /// - `DecryptionFailed`: authentication failed or plaintext is not JSON
    ///
    /// On any error the session's peer values are left untouched.
    pub fn decapsulate(&mut self, message: &SecureMessage) -> Result<Inbound, ProtocolError> {
        if !matches!(self.phase, SessionPhase::Initiated | SessionPhase::Established) {
            return Err(self.invalid_state("decapsulate"));
        }
        let (Some(suite), Some(own_pair)) = (&self.suite, &self.own_pair) else {
            return Err(self.invalid_state("decapsulate"));
        };
        if message.cipher_spec != suite.as_str() {
            return Err(ProtocolError::CipherSpecMismatch {
                expected: suite.as_str().to_string(),
                received: message.cipher_spec.clone(),
            });
        }

        let payload = decode_field("payload", &message.payload)?;
        let payload: SecurePayload = serde_json::from_slice(&payload)
            .map_err(|e| ProtocolError::malformed(format!("payload: {e}")))?;
        let peer_public = decode_public_value(&payload.secdata.dhpubvalue)
            .map_err(|e| ProtocolError::malformed(format!("dhpubvalue: {e}")))?;
        let peer_salt = decode_field("salt", &payload.secdata.salt)?;
        let iv = decode_field("iv", &payload.secdata.iv)?;
        let ciphertext = decode_field("message", &payload.message)?;
        let iterations = payload.secdata.index;
        check_iterations(iterations, self.max_iterations)
            .map_err(|e| ProtocolError::malformed(format!("index: {e}")))?;
        let peer_certificate = Certificate::from_wire(&message.certificate)
            .map_err(|e| ProtocolError::malformed(format!("certificate: {e}")))?;

        let key = derive_session_key(
            own_pair,
            &peer_public,
            &peer_salt,
            &self.own_salt,
            suite.aes.key_size,
            suite.hash,
            iterations,
        )?;
        let cipher = build_cipher(&key, suite.aes.mode, Some(iv.as_slice()), &mut self.env.rng())
            .map_err(|e| ProtocolError::malformed(format!("iv: {e}")))?;
        let plaintext = cipher
            .decrypt(&ciphertext)
            .map_err(|e| ProtocolError::DecryptionFailed { reason: e.to_string() })?;
        let request: Value = serde_json::from_slice(&plaintext).map_err(|e| {
            ProtocolError::DecryptionFailed { reason: format!("plaintext is not JSON: {e}") }
        })?;

        self.peer_public = Some(peer_public);
        self.peer_salt = peer_salt;
        self.iterations = iterations;
        self.phase = SessionPhase::Established;

        Ok(Inbound { request, token: payload.nounce, peer_certificate: Some(peer_certificate) })
    }

    fn invalid_state(&self, operation: &'static str) -> ProtocolError {
        ProtocolError::InvalidState { phase: self.phase, operation }
    }
}

impl<E> std::fmt::Debug for SecureSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("phase", &self.phase)
            .field("suite", &self.suite.as_ref().map(CipherSuite::as_str))
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD.decode(value).map_err(|e| ProtocolError::malformed(format!("{field}: {e}")))
}

fn check_iterations(iterations: u32, max: u32) -> Result<(), ProtocolError> {
    if iterations == 0 || iterations > max {
        return Err(secim_crypto::CryptoError::InvalidIterations { iterations, max }.into());
    }
    Ok(())
}
