//! Error types for the secure IM core.
//!
//! Strongly-typed errors for each layer: session protocol errors, trust
//! verdict reasons, revocation fetch failures and startup loading failures.
//!
//! Trust and fetch errors never cross the `TrustStore::validate` boundary;
//! they are logged and folded into a boolean verdict.

use std::path::PathBuf;

use secim_crypto::CryptoError;
use thiserror::Error;

use crate::session::SessionPhase;

/// Errors from the secure session protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Envelope names a different suite than the one negotiated
    #[error("cipher spec mismatch: negotiated {expected:?}, received {received:?}")]
    CipherSpecMismatch {
        /// Suite negotiated at bootstrap
        expected: String,
        /// Suite named by the envelope
        received: String,
    },

    /// Envelope is missing fields or carries undecodable values
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong
        reason: String,
    },

    /// Payload failed to decrypt or authenticate
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption failed
        reason: String,
    },

    /// Operation not allowed in the current handshake phase
    #[error("invalid state: cannot {operation} in {phase:?}")]
    InvalidState {
        /// Phase when the operation was attempted
        phase: SessionPhase,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Local key derivation or encryption failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ProtocolError {
    /// Returns true if the session must be torn down.
    ///
    /// Only a cipher-spec mismatch is fatal. Malformed envelopes and failed
    /// decryptions drop the offending message and leave the session usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CipherSpecMismatch { .. })
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope { reason: reason.into() }
    }
}

/// A certificate could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid certificate: {reason}")]
pub struct CertificateError {
    /// Why decoding failed
    pub reason: String,
}

impl CertificateError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Errors from revocation data retrieval.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure talking to a CRL distribution point
    #[error("HTTP fetch of {url} failed: {reason}")]
    Http {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Distribution point answered with a non-success status
    #[error("HTTP fetch of {url} returned status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Request did not complete in time
    #[error("fetch of {url} timed out")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// No data available for the URL
    #[error("nothing published at {url}")]
    NotFound {
        /// Requested URL
        url: String,
    },

    /// OCSP subprocess could not be run or exited abnormally
    #[error("OCSP query failed: {reason}")]
    Subprocess {
        /// Underlying failure
        reason: String,
    },

    /// Fetched bytes were not a usable CRL
    #[error("invalid CRL: {reason}")]
    InvalidCrl {
        /// Why parsing failed
        reason: String,
    },

    /// Could not persist fetched data
    #[error("storage error: {reason}")]
    Storage {
        /// Underlying I/O failure
        reason: String,
    },
}

/// Reasons a certificate is not trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustError {
    /// Outside its validity window
    #[error("certificate {id} is outside its validity window")]
    Expired {
        /// Certificate id
        id: String,
    },

    /// Listed as revoked by a CRL or an OCSP responder
    #[error("certificate {id} (serial {serial}) is revoked")]
    Revoked {
        /// Certificate id
        id: String,
        /// Serial in hex
        serial: String,
    },

    /// OCSP responder gave no definitive answer
    #[error("OCSP status for {id} is {status}")]
    OcspUndetermined {
        /// Certificate id
        id: String,
        /// Status reported by the responder
        status: String,
    },

    /// Issuer is not in the trusted set
    #[error("issuer {issuer} of {id} is not trusted")]
    UnknownIssuer {
        /// Certificate id
        id: String,
        /// Issuer id that failed to resolve
        issuer: String,
    },

    /// KeyUsage absent or lacks digitalSignature
    #[error("certificate {id} does not permit digital signatures")]
    MissingKeyUsage {
        /// Certificate id
        id: String,
    },

    /// Signature, anchor or CRL check failed during final verification
    #[error("chain verification failed for {id}: {reason}")]
    ChainVerificationFailed {
        /// Certificate id
        id: String,
        /// What failed
        reason: String,
    },

    /// Revocation data could not be obtained
    #[error("revocation data unavailable: {0}")]
    Fetch(#[from] FetchError),
}

impl TrustError {
    /// Returns true if the failure came from revocation checking.
    pub fn is_revocation_failure(&self) -> bool {
        matches!(self, Self::Revoked { .. } | Self::OcspUndetermined { .. } | Self::Fetch(_))
    }
}

/// Errors building a trust store at startup.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Directory or file could not be read or written
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// No certificate carries the configured identity label
    #[error("identity certificate {label:?} not found")]
    MissingIdentity {
        /// Configured label
        label: String,
    },
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
