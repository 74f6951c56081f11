//! Revocation data over the network.
//!
//! CRLs are downloaded over plain HTTP with a hyper client; OCSP queries
//! shell out to `openssl ocsp` and read the status line for the subject.
//! Both are bounded by the configured fetch timeout.

use std::{path::PathBuf, time::Duration};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Uri;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use secim_core::{
    FetchError, RevocationFetcher,
    trust::{OcspQuery, OcspStatus},
};
use tokio::process::Command;

/// HTTP and subprocess backed [`RevocationFetcher`].
#[derive(Clone)]
pub struct SystemFetcher {
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
    openssl: PathBuf,
}

impl SystemFetcher {
    /// Fetcher giving each request `timeout` and running OCSP queries with
    /// the `openssl` binary at `openssl`.
    pub fn new(timeout: Duration, openssl: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
            openssl: openssl.into(),
        }
    }
}

impl RevocationFetcher for SystemFetcher {
    async fn fetch_crl(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let http_error = |reason: String| FetchError::Http { url: url.to_string(), reason };
        let timed_out = || FetchError::Timeout { url: url.to_string() };

        let uri = url.parse::<Uri>().map_err(|e| http_error(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.get(uri))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| http_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }

        let body = tokio::time::timeout(self.timeout, response.into_body().collect())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| http_error(e.to_string()))?
            .to_bytes();

        tracing::debug!(url, bytes = body.len(), "CRL downloaded");
        Ok(body.to_vec())
    }

    async fn query_ocsp(&self, query: &OcspQuery) -> Result<OcspStatus, FetchError> {
        let mut command = Command::new(&self.openssl);
        command
            .arg("ocsp")
            .arg("-issuer")
            .arg(&query.issuer_path)
            .arg("-cert")
            .arg(&query.subject_path)
            .arg("-url")
            .arg(&query.responder_url)
            .arg("-CAfile")
            .arg(&query.ca_bundle)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| FetchError::Timeout { url: query.responder_url.clone() })?
            .map_err(|e| FetchError::Subprocess {
                reason: format!("{}: {e}", self.openssl.display()),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let status = OcspStatus::from_openssl_output(&stdout, &query.subject_path)
            .ok_or_else(|| FetchError::Subprocess {
                reason: format!(
                    "no status for {} ({}): {}",
                    query.subject_path.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })?;

        tracing::debug!(
            responder = %query.responder_url,
            subject = %query.subject_path.display(),
            ?status,
            "OCSP answer"
        );
        Ok(status)
    }
}
