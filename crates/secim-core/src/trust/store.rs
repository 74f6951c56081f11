//! The certificate trust engine.
//!
//! [`TrustStore`] decides whether a peer certificate is currently
//! trustworthy. A verdict is reached in stages:
//!
//! 1. A cached positive verdict for the same id and serial, younger than 24
//!    hours, short-circuits everything.
//! 2. The certificate must permit digital signatures.
//! 3. The issuer chain is walked through the trusted set up to a
//!    self-signed root. Every non-root link is checked for expiry and
//!    revocation (OCSP when the certificate names a responder, CRL and delta
//!    CRL otherwise).
//! 4. The whole chain is verified: signatures, validity windows, the
//!    self-signed anchor, and every cached CRL of every issuer on the chain.
//!
//! Any failure evicts the cached verdict. Errors are logged and folded into
//! `false`; callers only ever see the boolean.
//!
//! Peer certificates are kept on disk only while they hold a live verdict:
//! a failed validation or an expired verdict removes the record and its file.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use super::{
    certificate::Certificate,
    fetch::{OcspQuery, OcspStatus, RevocationFetcher},
    revocation::{Crl, RevocationCache},
    validity::ValidityCache,
};
use crate::{
    env::Environment,
    error::{FetchError, LoadError, TrustError},
};

/// Subject label of the local identity certificate.
pub const DEFAULT_IDENTITY_LABEL: &str = "SecurityServer";

/// Subject label of the local issuing CA.
pub const DEFAULT_CA_LABEL: &str = "ServerCA";

/// Longest issuer chain walked before giving up.
pub const MAX_CHAIN_DEPTH: usize = 16;

/// Where the trust engine finds and keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    /// Directories scanned for certificates at startup
    pub certificate_dirs: Vec<PathBuf>,
    /// Downloaded CRLs; wiped at startup
    pub crl_dir: PathBuf,
    /// Copies of peer certificates, handed to the OCSP client
    pub user_cert_dir: PathBuf,
    /// Trust-anchor bundle for OCSP responses
    pub ca_bundle: PathBuf,
    /// Id of the local identity certificate
    pub identity_label: String,
    /// Id of the local issuing CA
    pub ca_label: String,
}

impl TrustConfig {
    /// Conventional layout under one root directory.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            certificate_dirs: vec![root.join("certs")],
            crl_dir: root.join("crls"),
            user_cert_dir: root.join("user_certs"),
            ca_bundle: root.join("certs").join("ca_bundle.pem"),
            identity_label: DEFAULT_IDENTITY_LABEL.to_string(),
            ca_label: DEFAULT_CA_LABEL.to_string(),
        }
    }
}

/// A certificate and the file it is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedEntry {
    /// The certificate
    pub certificate: Certificate,
    /// Where it lives on disk
    pub path: PathBuf,
}

/// Certificate trust engine.
///
/// Owns the trusted set, the per-issuer revocation cache and the validity
/// cache. Not internally synchronised: share it behind a lock.
pub struct TrustStore<F, E> {
    config: TrustConfig,
    fetcher: F,
    env: E,
    identity: TrustedEntry,
    ca: Option<TrustedEntry>,
    trusted: HashMap<String, TrustedEntry>,
    peers: HashMap<String, TrustedEntry>,
    revocations: RevocationCache,
    validity: ValidityCache,
}

impl<F: RevocationFetcher, E: Environment> TrustStore<F, E> {
    /// Load certificates and prepare working directories.
    ///
    /// Every regular file in the configured certificate directories is
    /// parsed as PEM, then DER. Files that are neither are skipped. The
    /// certificates labelled as the local identity and CA are kept aside;
    /// every other id becomes a trust anchor (first file wins).
    ///
    /// # Errors
    ///
    /// - `Io`: a directory could not be read or created
    /// - `MissingIdentity`: no certificate carries the identity label
    pub fn load(config: TrustConfig, fetcher: F, env: E) -> Result<Self, LoadError> {
        let mut identity = None;
        let mut ca = None;
        let mut trusted = HashMap::new();

        for dir in &config.certificate_dirs {
            for (path, certificate) in read_certificates(dir)? {
                let id = certificate.id().to_string();
                let entry = TrustedEntry { certificate, path };

                if id == config.identity_label {
                    identity.get_or_insert(entry);
                } else if id == config.ca_label {
                    ca.get_or_insert(entry);
                } else if trusted.contains_key(&id) {
                    tracing::debug!(
                        id = %id,
                        path = %entry.path.display(),
                        "duplicate certificate id ignored"
                    );
                } else {
                    trusted.insert(id, entry);
                }
            }
        }

        let identity = identity
            .ok_or_else(|| LoadError::MissingIdentity { label: config.identity_label.clone() })?;

        match fs::remove_dir_all(&config.crl_dir) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(LoadError::io(&config.crl_dir, e)),
        }
        fs::create_dir_all(&config.crl_dir).map_err(|e| LoadError::io(&config.crl_dir, e))?;
        fs::create_dir_all(&config.user_cert_dir)
            .map_err(|e| LoadError::io(&config.user_cert_dir, e))?;

        tracing::info!(
            identity = %identity.certificate.id(),
            anchors = trusted.len(),
            "trust store loaded"
        );

        Ok(Self {
            config,
            fetcher,
            env,
            identity,
            ca,
            trusted,
            peers: HashMap::new(),
            revocations: RevocationCache::new(),
            validity: ValidityCache::new(),
        })
    }

    /// Decide whether `cert` is currently trustworthy.
    ///
    /// Never fails: every error is logged and reported as `false`.
    pub async fn validate(&mut self, cert: &Certificate) -> bool {
        let now = self.env.unix_time();
        let id = cert.id().to_string();

        for expired in self.validity.purge_expired(now) {
            self.forget_peer(&expired);
        }

        if self.validity.is_valid(&id, cert.serial(), now) {
            tracing::debug!(id = %id, "valid certificate (cached)");
            return true;
        }

        match self.evaluate(cert, now).await {
            Ok(()) => {
                self.validity.record(&id, cert.serial().clone(), now);
                tracing::debug!(id = %id, serial = %cert.serial(), "valid certificate");
                true
            },
            Err(err) => {
                self.validity.evict(&id);
                self.forget_peer(&id);
                if let TrustError::Fetch(fetch) = &err {
                    tracing::warn!(id = %id, error = %fetch, "revocation data unavailable");
                }
                tracing::debug!(id = %id, reason = %err, "invalid certificate");
                false
            },
        }
    }

    async fn evaluate(&mut self, cert: &Certificate, now: i64) -> Result<(), TrustError> {
        if !cert.has_digital_signature_usage() {
            return Err(TrustError::MissingKeyUsage { id: cert.id().to_string() });
        }

        let mut current = self.register_peer(cert)?;
        for _ in 0..MAX_CHAIN_DEPTH {
            let subject = current.certificate.id();
            let issuer_id = current.certificate.issuer_id();
            let Some(issuer) = self.trusted.get(issuer_id).cloned() else {
                return Err(TrustError::UnknownIssuer {
                    id: subject.to_string(),
                    issuer: issuer_id.to_string(),
                });
            };

            if issuer_id == subject {
                return self.verify_chain(cert, now);
            }

            self.check_revocation(&current, &issuer, now).await?;
            current = issuer;
        }

        Err(TrustError::ChainVerificationFailed {
            id: cert.id().to_string(),
            reason: format!("no self-signed root within {MAX_CHAIN_DEPTH} links"),
        })
    }

    /// Expiry and revocation check for one link of a chain.
    ///
    /// OCSP is authoritative when the certificate names a responder; only a
    /// definitive "good" passes. Otherwise the issuer's CRL (and delta CRL)
    /// is refreshed if absent or stale, and the certificate is revoked if
    /// any cached list from any issuer names its serial. A certificate with
    /// no CRL distribution point and no cached list for its issuer passes.
    pub async fn check_revocation(
        &mut self,
        entry: &TrustedEntry,
        issuer: &TrustedEntry,
        now: i64,
    ) -> Result<(), TrustError> {
        let cert = &entry.certificate;
        let id = cert.id().to_string();

        if !cert.is_valid_at(now) {
            return Err(TrustError::Expired { id });
        }

        if let Some(responder_url) = cert.ocsp_urls().first() {
            let query = OcspQuery {
                subject_path: entry.path.clone(),
                issuer_path: issuer.path.clone(),
                responder_url: responder_url.clone(),
                ca_bundle: self.config.ca_bundle.clone(),
            };
            return match self.fetcher.query_ocsp(&query).await? {
                OcspStatus::Good => Ok(()),
                OcspStatus::Revoked => {
                    Err(TrustError::Revoked { id, serial: cert.serial().to_string() })
                },
                OcspStatus::Unknown(status) => Err(TrustError::OcspUndetermined { id, status }),
            };
        }

        let issuer_id = cert.issuer_id();
        if !self.revocations.has_fresh_base(issuer_id, now) {
            let Some(url) = cert.crl_urls().first() else {
                tracing::debug!(id = %id, "no CRL distribution point, accepting");
                return Ok(());
            };
            let crl = self.download_crl(url, &issuer.certificate, "crl", now).await?;
            self.revocations.store_base(issuer_id, crl);
        }

        if !self.revocations.has_fresh_delta(issuer_id, now) {
            if let Some(url) = cert.delta_crl_urls().first() {
                let delta = self.download_crl(url, &issuer.certificate, "delta.crl", now).await?;
                self.revocations.store_delta(issuer_id, delta);
            }
        }

        if self.revocations.is_revoked_anywhere(cert.serial()) {
            return Err(TrustError::Revoked { id, serial: cert.serial().to_string() });
        }
        Ok(())
    }

    /// Fetch a CRL and accept it only if `issuer` named and signed it.
    async fn download_crl(
        &self,
        url: &str,
        issuer: &Certificate,
        extension: &str,
        now: i64,
    ) -> Result<Crl, FetchError> {
        let issuer_id = issuer.id();
        tracing::debug!(url, issuer = issuer_id, "downloading CRL");
        let bytes = self.fetcher.fetch_crl(url).await?;
        let crl = Crl::parse(&bytes, now)?;

        if crl.issuer_id() != issuer_id {
            return Err(FetchError::InvalidCrl {
                reason: format!("{url} is issued by {}, expected {issuer_id}", crl.issuer_id()),
            });
        }
        crl.verify_signed_by(issuer)?;

        let path = self.config.crl_dir.join(format!("{}.{extension}", file_stem(issuer_id)));
        fs::write(&path, crl.der()).map_err(|e| FetchError::Storage {
            reason: format!("{}: {e}", path.display()),
        })?;

        Ok(crl)
    }

    /// Full-chain verification against the trusted set and cached CRLs.
    fn verify_chain(&self, leaf: &Certificate, now: i64) -> Result<(), TrustError> {
        let failed = |reason: String| TrustError::ChainVerificationFailed {
            id: leaf.id().to_string(),
            reason,
        };

        let mut current = leaf.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            let Some(issuer) = self.trusted.get(current.issuer_id()) else {
                return Err(failed(format!("issuer {} is not anchored", current.issuer_id())));
            };

            current.verify_signed_by(&issuer.certificate).map_err(|e| failed(e.reason))?;

            if !current.is_valid_at(now) {
                return Err(failed(format!("{} is outside its validity window", current.id())));
            }

            if self.revocations.is_revoked_by(current.issuer_id(), current.serial()) == Some(true) {
                return Err(failed(format!(
                    "{} (serial {}) is listed by its issuer's CRL",
                    current.id(),
                    current.serial()
                )));
            }

            if current.is_self_issued() {
                return Ok(());
            }
            current = issuer.certificate.clone();
        }

        Err(failed(format!("no self-signed root within {MAX_CHAIN_DEPTH} links")))
    }

    /// Record a peer certificate and return its stored entry.
    ///
    /// The certificate is written to the user-certificate directory the
    /// first time its id is seen and whenever its serial changes.
    /// [`validate`](Self::validate) removes the record again when the
    /// verdict fails or expires.
    pub fn register_peer(&mut self, cert: &Certificate) -> Result<TrustedEntry, TrustError> {
        let id = cert.id();
        if let Some(known) = self.peers.get(id) {
            if known.certificate.serial() == cert.serial() {
                return Ok(known.clone());
            }
        }

        let path = self.config.user_cert_dir.join(format!("{}.pem", file_stem(id)));
        fs::write(&path, cert.to_pem()).map_err(|e| {
            TrustError::Fetch(FetchError::Storage { reason: format!("{}: {e}", path.display()) })
        })?;

        let entry = TrustedEntry { certificate: cert.clone(), path };
        self.peers.insert(id.to_string(), entry.clone());
        Ok(entry)
    }

    fn forget_peer(&mut self, id: &str) {
        let Some(entry) = self.peers.remove(id) else {
            return;
        };
        match fs::remove_file(&entry.path) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => {
                tracing::warn!(
                    id,
                    path = %entry.path.display(),
                    error = %e,
                    "stale peer file kept"
                );
            },
        }
    }

    /// The local identity certificate.
    pub fn identity(&self) -> &Certificate {
        &self.identity.certificate
    }

    /// The local issuing CA, if one was found.
    pub fn ca(&self) -> Option<&Certificate> {
        self.ca.as_ref().map(|e| &e.certificate)
    }

    /// A trusted certificate by id.
    pub fn trusted(&self, id: &str) -> Option<&TrustedEntry> {
        self.trusted.get(id)
    }

    /// Number of trust anchors and intermediates.
    pub fn trusted_count(&self) -> usize {
        self.trusted.len()
    }

    /// A registered peer certificate by id.
    pub fn peer(&self, id: &str) -> Option<&TrustedEntry> {
        self.peers.get(id)
    }

    /// Cached revocation lists.
    pub fn revocations(&self) -> &RevocationCache {
        &self.revocations
    }

    /// Cached verdicts.
    pub fn validity_cache(&self) -> &ValidityCache {
        &self.validity
    }

    /// Active configuration.
    pub fn config(&self) -> &TrustConfig {
        &self.config
    }
}

fn read_certificates(dir: &Path) -> Result<Vec<(PathBuf, Certificate)>, LoadError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| LoadError::io(dir, e))? {
        let entry = entry.map_err(|e| LoadError::io(dir, e))?;
        paths.push(entry.path());
    }
    paths.sort();

    let mut certificates = Vec::new();
    for path in paths {
        if path.is_dir() {
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| LoadError::io(&path, e))?;
        match Certificate::parse(&bytes) {
            Ok(cert) => certificates.push((path, cert)),
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "skipping non-certificate file"
                );
            },
        }
    }
    Ok(certificates)
}

/// File-name-safe rendering of a certificate id.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}
