//! Cipher-suite identifiers.
//!
//! A suite is negotiated once per session as a compact string such as
//! `AES-AES256_GCM-RSA2048_PSS-SHA256`: a family tag followed by the AES,
//! RSA and hash components, each carrying a numeric size after its algorithm
//! prefix and, for AES and RSA, a `_`-separated parameter.

use std::{fmt, str::FromStr};

use crate::error::SuiteParseError;

/// Block mode used by the symmetric codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    /// AES-GCM with a 16-byte nonce and appended 16-byte tag
    Gcm,
    /// AES-CTR with a 128-bit big-endian counter
    Ctr,
}

impl BlockMode {
    /// Whether the mode authenticates its ciphertext.
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Gcm)
    }

    /// Canonical name as it appears in suite identifiers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gcm => "GCM",
            Self::Ctr => "CTR",
        }
    }
}

impl FromStr for BlockMode {
    type Err = SuiteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GCM" => Ok(Self::Gcm),
            "CTR" => Ok(Self::Ctr),
            other => Err(SuiteParseError::UnsupportedMode(other.to_string())),
        }
    }
}

/// RSA signature/encryption padding named by the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsaPadding {
    /// Probabilistic signature scheme
    Pss,
    /// Optimal asymmetric encryption padding
    Oaep,
    /// PKCS#1 v1.5
    Pkcs1v15,
}

impl FromStr for RsaPadding {
    type Err = SuiteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PSS" => Ok(Self::Pss),
            "OAEP" => Ok(Self::Oaep),
            "PKCS1v15" => Ok(Self::Pkcs1v15),
            other => Err(SuiteParseError::UnsupportedPadding(other.to_string())),
        }
    }
}

/// Digest used for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Map a digest size in bits to an algorithm.
    pub fn from_bits(bits: u32) -> Result<Self, SuiteParseError> {
        match bits {
            256 => Ok(Self::Sha256),
            384 => Ok(Self::Sha384),
            512 => Ok(Self::Sha512),
            other => Err(SuiteParseError::UnsupportedDigest(other)),
        }
    }

    /// Digest size in bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::Sha256 => 256,
            Self::Sha384 => 384,
            Self::Sha512 => 512,
        }
    }
}

/// AES component of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesSpec {
    /// Key size in bytes (16, 24 or 32)
    pub key_size: usize,
    /// Block mode
    pub mode: BlockMode,
}

/// RSA component of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaSpec {
    /// Modulus size in bits
    pub key_size: u32,
    /// Padding scheme
    pub padding: RsaPadding,
}

/// A parsed cipher suite.
///
/// Keeps the identifier it was parsed from, since peers compare suites by
/// their textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuite {
    spec: String,
    family: String,
    /// AES parameters
    pub aes: AesSpec,
    /// RSA parameters
    pub rsa: RsaSpec,
    /// KDF digest
    pub hash: HashAlgorithm,
}

impl CipherSuite {
    /// Parse a suite identifier.
    ///
    /// # Errors
    ///
    /// - `ComponentCount`: not exactly four `-`-separated components
    /// - `MissingParameter`/`MissingNumber`/`BadPrefix`: a component is
    ///   malformed
    /// - `Unsupported*`: well-formed but names something we cannot run
    pub fn parse(spec: &str) -> Result<Self, SuiteParseError> {
        let components: Vec<&str> = spec.split('-').collect();
        let [family, aes, rsa, hash] = components.as_slice() else {
            return Err(SuiteParseError::ComponentCount { found: components.len() });
        };

        let (aes_size, aes_mode) = split_parameter(aes, "mode")?;
        let aes_bits = parse_size(aes_size, "AES", aes)?;
        if !matches!(aes_bits, 128 | 192 | 256) {
            return Err(SuiteParseError::UnsupportedKeySize(aes_bits));
        }

        let (rsa_size, rsa_padding) = split_parameter(rsa, "padding")?;
        let rsa_bits = parse_size(rsa_size, "RSA", rsa)?;

        let hash_bits = parse_size(hash, "SHA", hash)?;

        Ok(Self {
            spec: spec.to_string(),
            family: (*family).to_string(),
            aes: AesSpec { key_size: (aes_bits / 8) as usize, mode: aes_mode.parse()? },
            rsa: RsaSpec { key_size: rsa_bits, padding: rsa_padding.parse()? },
            hash: HashAlgorithm::from_bits(hash_bits)?,
        })
    }

    /// The identifier this suite was parsed from.
    pub fn as_str(&self) -> &str {
        &self.spec
    }

    /// Leading family tag (e.g. `AES`).
    pub fn family(&self) -> &str {
        &self.family
    }
}

impl FromStr for CipherSuite {
    type Err = SuiteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

fn split_parameter<'a>(
    component: &'a str,
    expected: &'static str,
) -> Result<(&'a str, &'a str), SuiteParseError> {
    match component.split_once('_') {
        Some((head, param)) if !param.is_empty() => Ok((head, param)),
        _ => Err(SuiteParseError::MissingParameter { component: component.to_string(), expected }),
    }
}

fn parse_size(field: &str, prefix: &'static str, component: &str) -> Result<u32, SuiteParseError> {
    let Some(digits) = field.strip_prefix(prefix) else {
        return Err(SuiteParseError::BadPrefix { component: component.to_string(), prefix });
    };
    digits
        .parse()
        .map_err(|_| SuiteParseError::MissingNumber { component: component.to_string() })
}
