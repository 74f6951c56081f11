//! Cached certificate revocation lists.
//!
//! One [`RevocationRecord`] per issuer holds its base CRL and, when the
//! issuer publishes one, a delta CRL. Revocation queries consult the union
//! of every cached list from every issuer.

use std::collections::{HashMap, HashSet};

use x509_parser::{parse_x509_certificate, parse_x509_crl};

use super::certificate::{Certificate, Serial, name_id};
use crate::error::FetchError;

/// Freshness window for CRLs that carry no nextUpdate (24 hours).
pub const DEFAULT_CRL_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// PEM label for CRLs.
pub const PEM_CRL: &str = "X509 CRL";

/// A parsed CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crl {
    issuer_id: String,
    revoked: HashSet<Serial>,
    next_update: Option<i64>,
    fetched_at: i64,
    der: Vec<u8>,
}

impl Crl {
    /// Parse PEM or DER bytes fetched at `fetched_at`.
    pub fn parse(bytes: &[u8], fetched_at: i64) -> Result<Self, FetchError> {
        let der = match pem::parse(bytes) {
            Ok(block) if block.tag() == PEM_CRL => block.contents().to_vec(),
            _ => bytes.to_vec(),
        };

        let (_, crl) =
            parse_x509_crl(&der).map_err(|e| FetchError::InvalidCrl { reason: e.to_string() })?;

        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| Serial::from_bytes(entry.raw_serial()))
            .collect();

        Ok(Self {
            issuer_id: name_id(crl.issuer()),
            revoked,
            next_update: crl.next_update().map(|t| t.timestamp()),
            fetched_at,
            der,
        })
    }

    /// Issuer id from the CRL's issuer name.
    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// Revoked serials.
    pub fn revoked(&self) -> &HashSet<Serial> {
        &self.revoked
    }

    /// Whether `serial` is listed.
    pub fn lists(&self, serial: &Serial) -> bool {
        self.revoked.contains(serial)
    }

    /// nextUpdate (Unix seconds), if present.
    pub fn next_update(&self) -> Option<i64> {
        self.next_update
    }

    /// The point after which this list must be refreshed.
    pub fn expires_at(&self) -> i64 {
        self.next_update.unwrap_or(self.fetched_at + DEFAULT_CRL_LIFETIME_SECS)
    }

    /// Fresh while `now <= expires_at()`.
    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.expires_at()
    }

    /// DER encoding as fetched.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Verify this list's signature with `issuer`'s public key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), FetchError> {
        let invalid = |reason: String| FetchError::InvalidCrl { reason };

        let (_, crl) = parse_x509_crl(&self.der).map_err(|e| invalid(e.to_string()))?;
        let (_, issuer_cert) =
            parse_x509_certificate(issuer.der()).map_err(|e| invalid(e.to_string()))?;

        crl.verify_signature(issuer_cert.public_key())
            .map_err(|e| invalid(format!("signature by {}: {e}", issuer.id())))
    }
}

/// Base and delta CRL for one issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationRecord {
    /// Base CRL
    pub base: Crl,
    /// Delta CRL, if the issuer publishes one
    pub delta: Option<Crl>,
}

impl RevocationRecord {
    fn lists(&self, serial: &Serial) -> bool {
        self.base.lists(serial) || self.delta.as_ref().is_some_and(|d| d.lists(serial))
    }
}

/// Revocation records keyed by issuer id.
#[derive(Debug, Default)]
pub struct RevocationCache {
    records: HashMap<String, RevocationRecord>,
}

impl RevocationCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for an issuer.
    pub fn get(&self, issuer_id: &str) -> Option<&RevocationRecord> {
        self.records.get(issuer_id)
    }

    /// Whether the issuer's base CRL is cached and fresh.
    pub fn has_fresh_base(&self, issuer_id: &str, now: i64) -> bool {
        self.records.get(issuer_id).is_some_and(|r| r.base.is_fresh(now))
    }

    /// Whether the issuer's delta CRL is cached and fresh.
    pub fn has_fresh_delta(&self, issuer_id: &str, now: i64) -> bool {
        self.records
            .get(issuer_id)
            .and_then(|r| r.delta.as_ref())
            .is_some_and(|d| d.is_fresh(now))
    }

    /// Install a base CRL, keeping any delta already held.
    pub fn store_base(&mut self, issuer_id: &str, crl: Crl) {
        match self.records.get_mut(issuer_id) {
            Some(record) => record.base = crl,
            None => {
                self.records
                    .insert(issuer_id.to_string(), RevocationRecord { base: crl, delta: None });
            },
        }
    }

    /// Install a delta CRL. Ignored when no base CRL is held for the issuer.
    pub fn store_delta(&mut self, issuer_id: &str, crl: Crl) {
        if let Some(record) = self.records.get_mut(issuer_id) {
            record.delta = Some(crl);
        }
    }

    /// Whether any cached list from any issuer revokes `serial`.
    pub fn is_revoked_anywhere(&self, serial: &Serial) -> bool {
        self.records.values().any(|r| r.lists(serial))
    }

    /// Whether the given issuer's cached lists revoke `serial`.
    ///
    /// `None` when nothing is cached for the issuer.
    pub fn is_revoked_by(&self, issuer_id: &str, serial: &Serial) -> Option<bool> {
        self.records.get(issuer_id).map(|r| r.lists(serial))
    }

    /// Number of issuers with cached lists.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
