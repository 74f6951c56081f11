//! Error types for the cryptographic primitives.

use thiserror::Error;

/// A cipher-suite identifier could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuiteParseError {
    /// Identifier did not split into family, AES, RSA and hash components
    #[error("expected 4 hyphen-separated components, found {found}")]
    ComponentCount {
        /// Number of components present
        found: usize,
    },

    /// A component lacked its `_`-separated parameter
    #[error("component {component:?} is missing its {expected} parameter")]
    MissingParameter {
        /// The offending component
        component: String,
        /// What was expected after the `_`
        expected: &'static str,
    },

    /// Component did not start with the expected algorithm prefix
    #[error("component {component:?} does not start with {prefix}")]
    BadPrefix {
        /// The offending component
        component: String,
        /// Required prefix (`AES`, `RSA`, `SHA`)
        prefix: &'static str,
    },

    /// A numeric size field was absent or not a number
    #[error("component {component:?} has no numeric size")]
    MissingNumber {
        /// The offending component
        component: String,
    },

    /// Block mode not supported by the codec
    #[error("unsupported block mode: {0}")]
    UnsupportedMode(String),

    /// RSA padding name not recognised
    #[error("unsupported RSA padding: {0}")]
    UnsupportedPadding(String),

    /// AES key size other than 128, 192 or 256 bits
    #[error("unsupported AES key size: {0} bits")]
    UnsupportedKeySize(u32),

    /// Digest size other than 256, 384 or 512 bits
    #[error("unsupported digest size: {0} bits")]
    UnsupportedDigest(u32),
}

/// Errors from key exchange and symmetric encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Cipher-suite identifier was malformed
    #[error("cipher suite: {0}")]
    Suite(#[from] SuiteParseError),

    /// Key is not a valid AES key length
    #[error("invalid AES key length: {len} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength {
        /// Length that was supplied
        len: usize,
    },

    /// IV is not 16 bytes
    #[error("invalid IV length: {len} bytes (expected 16)")]
    InvalidIvLength {
        /// Length that was supplied
        len: usize,
    },

    /// Iteration count outside the accepted range
    #[error("invalid KDF iteration count {iterations} (expected 1..={max})")]
    InvalidIterations {
        /// Requested iterations
        iterations: u32,
        /// Upper bound
        max: u32,
    },

    /// Peer public value could not be decoded as a P-384 point
    #[error("invalid public value: {reason}")]
    InvalidPublicValue {
        /// Why decoding failed
        reason: String,
    },

    /// HKDF refused the requested output length
    #[error("key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// Ciphertext failed authentication or was truncated
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption failed
        reason: String,
    },
}
