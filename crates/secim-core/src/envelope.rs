//! Wire envelopes.
//!
//! Every frame on the wire is a JSON object tagged by `type`:
//!
//! - `insecure`: the unauthenticated bootstrap carrying the peer's first
//!   public value, salt, iteration count and chosen cipher suite
//! - `secure`: an encrypted payload plus the sender's certificate
//!
//! The secure `payload` is itself base64 of a JSON [`SecurePayload`] whose
//! `message` field holds the base64 ciphertext. Binary fields are standard
//! base64 throughout. The correlation token travels as `nounce` and is
//! echoed verbatim; it may be any JSON value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Unauthenticated bootstrap
    Insecure(InsecureMessage),
    /// Encrypted message
    Secure(SecureMessage),
}

impl Envelope {
    /// Parse a frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::malformed(e.to_string()))
    }

    /// Serialise a frame.
    pub fn to_json(&self) -> String {
        let Ok(text) = serde_json::to_string(self) else {
            unreachable!("envelopes contain only strings, integers and JSON values");
        };
        text
    }
}

/// Key-exchange values in a bootstrap message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSecData {
    /// Base64 PEM public value
    pub dhpubvalue: String,
    /// Base64 salt
    pub salt: String,
    /// HKDF iteration count
    pub index: u32,
}

/// Bootstrap message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsecureMessage {
    /// Chosen suite; `null` keeps the one already negotiated
    pub cipher_spec: Option<String>,
    /// Key-exchange values
    pub secdata: BootstrapSecData,
    /// Correlation token
    #[serde(default)]
    pub nounce: Value,
}

/// Encrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureMessage {
    /// Base64 of a JSON [`SecurePayload`]
    pub payload: String,
    /// Signature over the payload; always `null` on send, ignored on receipt
    pub signature: Option<String>,
    /// Base64 PEM certificate of the sender
    pub certificate: String,
    /// Suite the payload was encrypted under
    pub cipher_spec: String,
}

/// Key-exchange values in a secure payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecData {
    /// Base64 PEM public value minted for this message
    pub dhpubvalue: String,
    /// Base64 salt minted for this message
    pub salt: String,
    /// Base64 IV
    pub iv: String,
    /// HKDF iteration count
    pub index: u32,
}

/// Decoded `payload` of a secure message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurePayload {
    /// Base64 ciphertext
    pub message: String,
    /// Correlation token
    #[serde(default)]
    pub nounce: Value,
    /// Key-exchange values
    pub secdata: SecData,
}
