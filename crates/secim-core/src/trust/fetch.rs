//! Revocation data retrieval.
//!
//! The trust engine never performs I/O itself: CRL downloads and OCSP
//! queries go through a [`RevocationFetcher`]. The server supplies an
//! HTTP and subprocess backed implementation; [`MemoryFetcher`] serves
//! canned answers for tests.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::error::FetchError;

/// Inputs to one OCSP query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspQuery {
    /// Stored copy of the certificate being checked
    pub subject_path: PathBuf,
    /// Stored copy of its issuer
    pub issuer_path: PathBuf,
    /// Responder URL from the certificate's AuthorityInfoAccess
    pub responder_url: String,
    /// Trust-anchor bundle the responder's signature is checked against
    pub ca_bundle: PathBuf,
}

/// Certificate status reported by an OCSP responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcspStatus {
    /// Definitively not revoked
    Good,
    /// Revoked
    Revoked,
    /// Anything else the responder said
    Unknown(String),
}

impl OcspStatus {
    /// Extract the status for `subject_path` from `openssl ocsp` output.
    ///
    /// The tool prints one `<path>: <status>` line per queried certificate.
    /// Returns `None` when no such line is present.
    pub fn from_openssl_output(output: &str, subject_path: &Path) -> Option<Self> {
        let subject = subject_path.to_string_lossy();
        let line = output.lines().find(|line| line.contains(subject.as_ref()))?;
        let (_, status) = line.rsplit_once(':')?;

        Some(match status.trim() {
            "good" => Self::Good,
            "revoked" => Self::Revoked,
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Source of CRLs and OCSP answers.
///
/// # Invariants
///
/// - Errors are reported, never papered over: the trust engine treats any
///   `Err` as "revocation status unknown" and fails closed.
pub trait RevocationFetcher: Send + Sync + 'static {
    /// Download the CRL published at `url` (PEM or DER bytes).
    fn fetch_crl(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;

    /// Ask an OCSP responder about one certificate.
    fn query_ocsp(
        &self,
        query: &OcspQuery,
    ) -> impl Future<Output = Result<OcspStatus, FetchError>> + Send;
}

/// In-memory fetcher for tests.
///
/// Thread-safe via Arc<Mutex<_>>. Clone shares the same underlying state, so
/// a test can keep a handle after moving one into a `TrustStore`.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    inner: Arc<Mutex<MemoryFetcherInner>>,
}

#[derive(Default)]
struct MemoryFetcherInner {
    crls: HashMap<String, Vec<u8>>,
    ocsp: HashMap<String, Result<OcspStatus, FetchError>>,
    crl_requests: Vec<String>,
    ocsp_queries: Vec<OcspQuery>,
}

impl MemoryFetcher {
    /// Empty fetcher: every request fails with `NotFound`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` at `url`, replacing anything published before.
    #[allow(clippy::expect_used)]
    pub fn publish_crl(&self, url: &str, bytes: Vec<u8>) {
        self.inner.lock().expect("fetcher lock").crls.insert(url.to_string(), bytes);
    }

    /// Stop serving `url`.
    #[allow(clippy::expect_used)]
    pub fn withdraw_crl(&self, url: &str) {
        self.inner.lock().expect("fetcher lock").crls.remove(url);
    }

    /// Answer OCSP queries to `responder_url`.
    #[allow(clippy::expect_used)]
    pub fn set_ocsp(&self, responder_url: &str, answer: Result<OcspStatus, FetchError>) {
        self.inner.lock().expect("fetcher lock").ocsp.insert(responder_url.to_string(), answer);
    }

    /// Number of CRL downloads attempted.
    #[allow(clippy::expect_used)]
    pub fn crl_fetch_count(&self) -> usize {
        self.inner.lock().expect("fetcher lock").crl_requests.len()
    }

    /// URLs requested, in order.
    #[allow(clippy::expect_used)]
    pub fn crl_requests(&self) -> Vec<String> {
        self.inner.lock().expect("fetcher lock").crl_requests.clone()
    }

    /// OCSP queries made, in order.
    #[allow(clippy::expect_used)]
    pub fn ocsp_queries(&self) -> Vec<OcspQuery> {
        self.inner.lock().expect("fetcher lock").ocsp_queries.clone()
    }
}

impl RevocationFetcher for MemoryFetcher {
    #[allow(clippy::expect_used)]
    async fn fetch_crl(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut inner = self.inner.lock().expect("fetcher lock");
        inner.crl_requests.push(url.to_string());
        inner.crls.get(url).cloned().ok_or_else(|| FetchError::NotFound { url: url.to_string() })
    }

    #[allow(clippy::expect_used)]
    async fn query_ocsp(&self, query: &OcspQuery) -> Result<OcspStatus, FetchError> {
        let mut inner = self.inner.lock().expect("fetcher lock");
        inner.ocsp_queries.push(query.clone());
        inner
            .ocsp
            .get(&query.responder_url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NotFound { url: query.responder_url.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openssl_output() {
        let output = "Response verify OK\n\
                      /srv/user_certs/alice.pem: good\n\
                      \tThis Update: Jan  1 00:00:00 2026 GMT\n";
        assert_eq!(
            OcspStatus::from_openssl_output(output, Path::new("/srv/user_certs/alice.pem")),
            Some(OcspStatus::Good)
        );

        let output = "/srv/user_certs/bob.pem: revoked\n";
        assert_eq!(
            OcspStatus::from_openssl_output(output, Path::new("/srv/user_certs/bob.pem")),
            Some(OcspStatus::Revoked)
        );

        let output = "/srv/user_certs/carol.pem: unknown\n";
        assert_eq!(
            OcspStatus::from_openssl_output(output, Path::new("/srv/user_certs/carol.pem")),
            Some(OcspStatus::Unknown("unknown".to_string()))
        );
    }

    #[test]
    fn missing_status_line() {
        assert_eq!(
            OcspStatus::from_openssl_output("Error querying OCSP responder\n", Path::new("/a.pem")),
            None
        );
    }

    #[tokio::test]
    async fn memory_fetcher_serves_and_counts() {
        let fetcher = MemoryFetcher::new();
        let handle = fetcher.clone();
        fetcher.publish_crl("http://ca/root.crl", vec![1, 2, 3]);

        assert_eq!(fetcher.fetch_crl("http://ca/root.crl").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(
            fetcher.fetch_crl("http://ca/other.crl").await,
            Err(FetchError::NotFound { url: "http://ca/other.crl".to_string() })
        );
        assert_eq!(handle.crl_fetch_count(), 2);
        assert_eq!(handle.crl_requests()[1], "http://ca/other.crl");
    }

    #[tokio::test]
    async fn memory_fetcher_answers_ocsp() {
        let fetcher = MemoryFetcher::new();
        fetcher.set_ocsp("http://ocsp", Ok(OcspStatus::Good));
        let query = OcspQuery {
            subject_path: "/tmp/a.pem".into(),
            issuer_path: "/tmp/ca.pem".into(),
            responder_url: "http://ocsp".to_string(),
            ca_bundle: "/tmp/bundle.pem".into(),
        };

        assert_eq!(fetcher.query_ocsp(&query).await, Ok(OcspStatus::Good));
        assert_eq!(fetcher.ocsp_queries(), vec![query]);
    }
}
