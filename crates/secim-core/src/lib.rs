//! Secure IM Core
//!
//! Protocol and trust logic for the secure messaging server. Sans-IO apart
//! from the certificate directories the trust engine reads at startup and
//! the files it writes for the OCSP client: network access is delegated to
//! a [`trust::RevocationFetcher`], time and randomness to an
//! [`env::Environment`].
//!
//! # Components
//!
//! - [`session::SecureSession`]: per-connection handshake and key ratchet
//! - [`envelope`]: wire JSON for bootstrap and secure messages
//! - [`trust::TrustStore`]: chain validation, CRL/delta-CRL/OCSP revocation
//!   checks and a 24-hour validity cache
//!
//! # Error Model
//!
//! Session errors are per message except for a cipher-spec mismatch, which
//! is fatal to the connection (see [`ProtocolError::is_fatal`]). Trust
//! errors never escape `TrustStore::validate`; they are logged and the
//! verdict is `false`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod envelope;
pub mod error;
pub mod session;
pub mod trust;

pub use env::Environment;
pub use envelope::{Envelope, InsecureMessage, SecureMessage, SecurePayload};
pub use error::{CertificateError, FetchError, LoadError, ProtocolError, TrustError};
pub use session::{Inbound, SecureSession, SessionPhase};
pub use trust::{Certificate, MemoryFetcher, RevocationFetcher, TrustConfig, TrustStore};
