//! AES cipher contexts for message payloads.
//!
//! GCM runs with a 16-byte nonce and appends its 16-byte tag to the
//! ciphertext. CTR uses the IV as the initial 128-bit big-endian counter
//! block and adds no integrity protection.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    AesGcm,
    aead::{Aead, KeyInit, Nonce, consts::U16},
};
use ctr::{
    Ctr128BE,
    cipher::{KeyIvInit, StreamCipher},
};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{error::CryptoError, suite::BlockMode};

/// IV size for every supported mode.
pub const IV_SIZE: usize = 16;

/// GCM authentication tag size.
pub const GCM_TAG_SIZE: usize = 16;

type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes192Gcm16 = AesGcm<Aes192, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A key, mode and IV ready to encrypt or decrypt one payload.
pub struct CipherContext {
    key: Zeroizing<Vec<u8>>,
    mode: BlockMode,
    iv: [u8; IV_SIZE],
}

/// Build a cipher context.
///
/// With `iv: Some(..)` (decryption) the supplied IV is used. With `None`
/// (encryption) a fresh IV is drawn from `rng`; read it back with
/// [`CipherContext::iv`] to transmit it.
///
/// # Errors
///
/// - `InvalidKeyLength`: key is not 16, 24 or 32 bytes
/// - `InvalidIvLength`: supplied IV is not 16 bytes
pub fn build_cipher<R: RngCore + CryptoRng>(
    key: &[u8],
    mode: BlockMode,
    iv: Option<&[u8]>,
    rng: &mut R,
) -> Result<CipherContext, CryptoError> {
    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(CryptoError::InvalidKeyLength { len: key.len() });
    }

    let iv = match iv {
        Some(given) => <[u8; IV_SIZE]>::try_from(given)
            .map_err(|_| CryptoError::InvalidIvLength { len: given.len() })?,
        None => {
            let mut fresh = [0u8; IV_SIZE];
            rng.fill_bytes(&mut fresh);
            fresh
        },
    };

    Ok(CipherContext { key: Zeroizing::new(key.to_vec()), mode, iv })
}

impl CipherContext {
    /// The IV this context runs with.
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// The block mode.
    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// Encrypt a payload.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.mode {
            BlockMode::Gcm => match self.key.len() {
                16 => gcm_seal::<Aes128Gcm16>(&self.key, &self.iv, plaintext),
                24 => gcm_seal::<Aes192Gcm16>(&self.key, &self.iv, plaintext),
                _ => gcm_seal::<Aes256Gcm16>(&self.key, &self.iv, plaintext),
            },
            BlockMode::Ctr => {
                let mut buffer = plaintext.to_vec();
                self.apply_ctr(&mut buffer)?;
                Ok(buffer)
            },
        }
    }

    /// Decrypt a payload.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed`: GCM tag mismatch or ciphertext shorter than the
    ///   tag. CTR cannot detect tampering.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.mode {
            BlockMode::Gcm => {
                if ciphertext.len() < GCM_TAG_SIZE {
                    return Err(CryptoError::DecryptionFailed {
                        reason: format!("ciphertext of {} bytes has no tag", ciphertext.len()),
                    });
                }
                match self.key.len() {
                    16 => gcm_open::<Aes128Gcm16>(&self.key, &self.iv, ciphertext),
                    24 => gcm_open::<Aes192Gcm16>(&self.key, &self.iv, ciphertext),
                    _ => gcm_open::<Aes256Gcm16>(&self.key, &self.iv, ciphertext),
                }
            },
            BlockMode::Ctr => {
                let mut buffer = ciphertext.to_vec();
                self.apply_ctr(&mut buffer)?;
                Ok(buffer)
            },
        }
    }

    fn apply_ctr(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        match self.key.len() {
            16 => ctr_apply::<Ctr128BE<Aes128>>(&self.key, &self.iv, buffer),
            24 => ctr_apply::<Ctr128BE<Aes192>>(&self.key, &self.iv, buffer),
            _ => ctr_apply::<Ctr128BE<Aes256>>(&self.key, &self.iv, buffer),
        }
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("mode", &self.mode)
            .field("iv", &self.iv)
            .finish_non_exhaustive()
    }
}

fn gcm_seal<C: KeyInit + Aead>(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength { len: key.len() })?;

    let Ok(ciphertext) = cipher.encrypt(Nonce::<C>::from_slice(iv), plaintext) else {
        unreachable!("AES-GCM encryption cannot fail with valid inputs");
    };
    Ok(ciphertext)
}

fn gcm_open<C: KeyInit + Aead>(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength { len: key.len() })?;

    cipher
        .decrypt(Nonce::<C>::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

fn ctr_apply<C: KeyIvInit + StreamCipher>(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    buffer: &mut [u8],
) -> Result<(), CryptoError> {
    let mut cipher =
        C::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength { len: key.len() })?;
    cipher.apply_keystream(buffer);
    Ok(())
}
