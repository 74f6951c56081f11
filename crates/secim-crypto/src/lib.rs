//! Secure IM cryptographic primitives
//!
//! Building blocks for the per-connection session protocol. Functions are
//! pure apart from randomness, which callers supply as a CSPRNG so tests
//! can run against seeded generators.
//!
//! # Key Lifecycle
//!
//! Every message gets its own key. The sender mints a fresh P-384 pair and
//! salt, agrees a secret with the peer's newest public value and stretches it
//! through iterated HKDF:
//!
//! ```text
//! Ephemeral P-384 pair + peer public value
//!        │
//!        ▼
//! ECDH → shared secret
//!        │
//!        ▼
//! HKDF × iterations (salt = first || second) → AES key
//!        │
//!        ▼
//! AES-GCM / AES-CTR → ciphertext
//! ```
//!
//! The receiver keeps the secret half of the pair it last sent until the
//! peer's reply arrives, since that reply is keyed against it.
//!
//! # Security
//!
//! - Secret scalars and derived keys are zeroized on drop
//! - GCM tags are verified before any plaintext is returned
//! - CTR offers confidentiality only; suites choosing it rely on transport
//!   integrity

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod key_exchange;
pub mod suite;
pub mod symmetric;

pub use error::{CryptoError, SuiteParseError};
pub use key_exchange::{
    EphemeralKeyPair, KDF_INFO, MAX_ITERATIONS, SALT_SIZE, decode_public_value,
    derive_session_key, encode_public_value, generate_ephemeral_keypair, generate_salt,
};
pub use p384::PublicKey;
pub use suite::{AesSpec, BlockMode, CipherSuite, HashAlgorithm, RsaPadding, RsaSpec};
pub use symmetric::{CipherContext, GCM_TAG_SIZE, IV_SIZE, build_cipher};
