//! Ephemeral P-384 key agreement and iterated HKDF.
//!
//! Every outbound message is keyed by a fresh ephemeral pair. The shared
//! secret is stretched by chaining HKDF rounds: round `n` uses the output of
//! round `n - 1` as its input key material, with the same salt and context in
//! every round.
//!
//! The salt is always `first_salt || second_salt`. Which side's salt goes
//! first depends on the direction of the message, not on the role of the
//! peer:
//!
//! ```text
//! encrypting: first = own newest salt,     second = peer's last salt
//! decrypting: first = salt in the message, second = own salt at last send
//! ```
//!
//! Both sides therefore feed HKDF the same bytes for the same message.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hkdf::Hkdf;
use p384::{
    PublicKey, SecretKey,
    ecdh::diffie_hellman,
    pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding},
};
use rand_core::{CryptoRng, RngCore};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::{error::CryptoError, suite::HashAlgorithm};

/// HKDF context string bound into every round.
pub const KDF_INFO: &[u8] = b"handshake data";

/// Upper bound on KDF rounds a peer may request.
pub const MAX_ITERATIONS: u32 = 10_000;

/// Size of per-message salts.
pub const SALT_SIZE: usize = 16;

/// An ephemeral P-384 key pair.
///
/// The secret scalar is zeroized when the pair is dropped.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh pair from the caller's CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = SecretKey::random(rng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// The public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The public half in wire form.
    pub fn encoded_public(&self) -> String {
        encode_public_value(&self.public)
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

/// Generate a fresh ephemeral key pair.
pub fn generate_ephemeral_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> EphemeralKeyPair {
    EphemeralKeyPair::generate(rng)
}

/// Generate a fresh per-message salt.
pub fn generate_salt<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rng.fill_bytes(&mut salt);
    salt
}

/// Encode a public value as base64 of its PEM `SubjectPublicKeyInfo`.
pub fn encode_public_value(public: &PublicKey) -> String {
    let Ok(pem) = public.to_public_key_pem(LineEnding::LF) else {
        unreachable!("PEM encoding of a valid P-384 point cannot fail");
    };
    STANDARD.encode(pem.as_bytes())
}

/// Decode a public value produced by [`encode_public_value`].
///
/// # Errors
///
/// - `InvalidPublicValue`: not base64, not PEM, or not a point on P-384
pub fn decode_public_value(encoded: &str) -> Result<PublicKey, CryptoError> {
    let pem = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidPublicValue { reason: format!("base64: {e}") })?;
    let pem = String::from_utf8(pem)
        .map_err(|_| CryptoError::InvalidPublicValue { reason: "PEM is not UTF-8".to_string() })?;

    PublicKey::from_public_key_pem(&pem)
        .map_err(|e| CryptoError::InvalidPublicValue { reason: e.to_string() })
}

/// Derive a session key from our secret and the peer's public value.
///
/// Deterministic for identical inputs. Each additional round changes the
/// output.
///
/// # Errors
///
/// - `InvalidKeyLength`: `key_size` is not 16, 24 or 32
/// - `InvalidIterations`: `iterations` is zero or above [`MAX_ITERATIONS`]
pub fn derive_session_key(
    local: &EphemeralKeyPair,
    peer: &PublicKey,
    first_salt: &[u8],
    second_salt: &[u8],
    key_size: usize,
    hash: HashAlgorithm,
    iterations: u32,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if !matches!(key_size, 16 | 24 | 32) {
        return Err(CryptoError::InvalidKeyLength { len: key_size });
    }
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return Err(CryptoError::InvalidIterations { iterations, max: MAX_ITERATIONS });
    }

    let shared = diffie_hellman(local.secret.to_nonzero_scalar(), peer.as_affine());

    let mut salt = Vec::with_capacity(first_salt.len() + second_salt.len());
    salt.extend_from_slice(first_salt);
    salt.extend_from_slice(second_salt);

    let mut material = Zeroizing::new(shared.raw_secret_bytes().to_vec());
    for _ in 0..iterations {
        let mut okm = Zeroizing::new(vec![0u8; key_size]);
        hkdf_round(hash, &salt, &material, &mut okm)?;
        material = okm;
    }

    Ok(material)
}

fn hkdf_round(
    hash: HashAlgorithm,
    salt: &[u8],
    ikm: &[u8],
    okm: &mut [u8],
) -> Result<(), CryptoError> {
    let expanded = match hash {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::new(Some(salt), ikm).expand(KDF_INFO, okm),
        HashAlgorithm::Sha384 => Hkdf::<Sha384>::new(Some(salt), ikm).expand(KDF_INFO, okm),
        HashAlgorithm::Sha512 => Hkdf::<Sha512>::new(Some(salt), ikm).expand(KDF_INFO, okm),
    };
    expanded.map_err(|e| CryptoError::KeyDerivation { reason: e.to_string() })
}
