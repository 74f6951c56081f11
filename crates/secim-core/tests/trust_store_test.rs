//! Integration tests for the certificate trust engine.
//!
//! Builds a throwaway PKI with rcgen (root -> intermediate -> leaf), lays it
//! out on disk the way a deployment would, and drives `TrustStore::validate`
//! against a `MemoryFetcher` and a pinned clock.

use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint,
    CustomExtension, DistinguishedName, DnType, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose,
    RevocationReason, RevokedCertParams, SerialNumber, date_time_ymd,
};
use secim_core::{
    Certificate, Environment, LoadError, MemoryFetcher, TrustConfig, TrustStore,
    error::FetchError,
    trust::{OcspStatus, Serial},
};
use tempfile::TempDir;
use time::OffsetDateTime;

/// 2026-01-01T00:00:00Z
const NOW: u64 = 1_767_225_600;
const DAY: u64 = 86_400;

const ROOT_CRL: &str = "http://crl.test/root.crl";
const INTERMEDIATE_CRL: &str = "http://crl.test/intermediate.crl";
const INTERMEDIATE_DELTA: &str = "http://crl.test/intermediate-delta.crl";
const OCSP_URL: &str = "http://ocsp.test";

// Pinned clock that tests can move forward
#[derive(Clone)]
struct TestEnv {
    now: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            now: Arc::new(AtomicU64::new(NOW)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(42))),
        }
    }

    fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

fn base_params(name: &str, serial: u64) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    params.serial_number = Some(SerialNumber::from(serial));
    params.not_before = date_time_ymd(2025, 1, 1);
    params.not_after = date_time_ymd(2027, 1, 1);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    // rcgen writes no extensions at all for a plain leaf without this
    params.use_authority_key_identifier_extension = true;
    params
}

fn authority(
    name: &str,
    serial: u64,
    parent: Option<&Authority>,
    crl_url: Option<&str>,
) -> Authority {
    let mut params = base_params(name, serial);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    if let Some(url) = crl_url {
        params.crl_distribution_points = vec![CrlDistributionPoint { uris: vec![url.to_string()] }];
    }

    let key = KeyPair::generate().unwrap();
    let cert = match parent {
        Some(parent) => params.signed_by(&key, &parent.cert, &parent.key).unwrap(),
        None => params.self_signed(&key).unwrap(),
    };
    Authority { cert, key }
}

fn issue(params: CertificateParams, issuer: &Authority) -> Certificate {
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Certificate::from_der(cert.der()).unwrap()
}

fn crl(issuer: &Authority, revoked: &[u64], next_update: OffsetDateTime) -> Vec<u8> {
    let params = CertificateRevocationListParams {
        this_update: date_time_ymd(2025, 12, 31),
        next_update,
        crl_number: SerialNumber::from(1u64),
        issuing_distribution_point: None,
        revoked_certs: revoked
            .iter()
            .map(|&serial| RevokedCertParams {
                serial_number: SerialNumber::from(serial),
                revocation_time: date_time_ymd(2025, 12, 31),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params.signed_by(&issuer.cert, &issuer.key).unwrap().der().to_vec()
}

fn der_tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    assert!(body.len() < 0x80);
    let mut out = vec![tag, body.len() as u8];
    out.extend_from_slice(body);
    out
}

// AuthorityInfoAccess { AccessDescription { id-ad-ocsp, URI } }
fn ocsp_extension(url: &str) -> CustomExtension {
    let mut description = vec![0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];
    description.extend(der_tlv(0x86, url.as_bytes()));
    let content = der_tlv(0x30, &der_tlv(0x30, &description));
    CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 1], content)
}

// freshestCRL { DistributionPoint { [0] fullName { [0] { URI } } } }
fn freshest_crl_extension(url: &str) -> CustomExtension {
    let full_name = der_tlv(0xA0, &der_tlv(0xA0, &der_tlv(0x86, url.as_bytes())));
    let content = der_tlv(0x30, &der_tlv(0x30, &full_name));
    CustomExtension::from_oid_content(&[2, 5, 29, 46], content)
}

/// On-disk PKI with a root, an intermediate, the server identity and the
/// server's own CA.
struct Pki {
    dir: TempDir,
    root: Authority,
    intermediate: Authority,
    fetcher: MemoryFetcher,
    env: TestEnv,
}

impl Pki {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let certs = dir.path().join("certs");
        fs::create_dir_all(&certs).unwrap();

        let root = authority("Test Root", 1, None, None);
        let intermediate = authority("Test Intermediate", 2, Some(&root), Some(ROOT_CRL));
        let identity = authority("SecurityServer", 3, None, None);
        let server_ca = authority("ServerCA", 4, None, None);

        fs::write(certs.join("root.pem"), root.cert.pem()).unwrap();
        fs::write(certs.join("intermediate.pem"), intermediate.cert.pem()).unwrap();
        fs::write(certs.join("server.pem"), identity.cert.pem()).unwrap();
        fs::write(certs.join("server_ca.pem"), server_ca.cert.pem()).unwrap();

        let fetcher = MemoryFetcher::new();
        fetcher.publish_crl(ROOT_CRL, crl(&root, &[], date_time_ymd(2026, 1, 2)));
        fetcher.publish_crl(INTERMEDIATE_CRL, crl(&intermediate, &[], date_time_ymd(2026, 1, 2)));

        Self { dir, root, intermediate, fetcher, env: TestEnv::new() }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn store(&self) -> TrustStore<MemoryFetcher, TestEnv> {
        self.load().unwrap()
    }

    fn load(&self) -> Result<TrustStore<MemoryFetcher, TestEnv>, LoadError> {
        let config = TrustConfig::under(self.dir.path());
        TrustStore::load(config, self.fetcher.clone(), self.env.clone())
    }

    /// Leaf params pointing at the intermediate's CRL.
    fn leaf_params(&self, name: &str, serial: u64) -> CertificateParams {
        let mut params = base_params(name, serial);
        params.crl_distribution_points =
            vec![CrlDistributionPoint { uris: vec![INTERMEDIATE_CRL.to_string()] }];
        params
    }

    fn leaf(&self, name: &str, serial: u64) -> Certificate {
        issue(self.leaf_params(name, serial), &self.intermediate)
    }

    fn revoke_in_intermediate(&self, serials: &[u64], next_update: OffsetDateTime) {
        self.fetcher.publish_crl(INTERMEDIATE_CRL, crl(&self.intermediate, serials, next_update));
    }
}

#[test]
fn load_separates_identity_and_ca_from_anchors() {
    let pki = Pki::new();
    let store = pki.store();

    assert_eq!(store.identity().id(), "SecurityServer");
    assert_eq!(store.ca().map(Certificate::id), Some("ServerCA"));
    assert_eq!(store.trusted_count(), 2);
    assert!(store.trusted("Test Root").is_some());
    assert!(store.trusted("Test Intermediate").is_some());
    assert!(store.trusted("SecurityServer").is_none());
    assert!(store.trusted("ServerCA").is_none());
}

#[test]
fn load_skips_garbage_and_accepts_der() {
    let pki = Pki::new();
    let certs = pki.path("certs");
    fs::write(certs.join("README"), "not a certificate").unwrap();
    fs::create_dir(certs.join("nested")).unwrap();
    let extra = authority("Extra Root", 5, None, None);
    fs::write(certs.join("extra.der"), extra.cert.der()).unwrap();

    let store = pki.store();
    assert_eq!(store.trusted_count(), 3);
    assert_eq!(store.trusted("Extra Root").unwrap().path, certs.join("extra.der"));
}

#[test]
fn load_wipes_crl_directory_and_prepares_user_certs() {
    let pki = Pki::new();
    fs::create_dir_all(pki.path("crls")).unwrap();
    fs::write(pki.path("crls/stale.crl"), b"old").unwrap();

    let _store = pki.store();
    assert!(pki.path("crls").is_dir());
    assert!(!pki.path("crls/stale.crl").exists());
    assert!(pki.path("user_certs").is_dir());
}

#[test]
fn load_requires_identity() {
    let pki = Pki::new();
    fs::remove_file(pki.path("certs/server.pem")).unwrap();

    let result = pki.load();
    assert!(matches!(
        result,
        Err(LoadError::MissingIdentity { ref label }) if label == "SecurityServer"
    ));
}

#[test]
fn load_reports_missing_directory() {
    let dir = TempDir::new().unwrap();
    let config = TrustConfig::under(dir.path());
    let result = TrustStore::load(config, MemoryFetcher::new(), TestEnv::new());
    assert!(matches!(result, Err(LoadError::Io { .. })));
}

#[tokio::test]
async fn valid_chain_is_accepted_and_cached() {
    let pki = Pki::new();
    let mut store = pki.store();
    let alice = pki.leaf("alice", 10);

    assert!(store.validate(&alice).await);
    assert_eq!(pki.fetcher.crl_requests(), vec![INTERMEDIATE_CRL, ROOT_CRL]);

    let entry = store.validity_cache().get("alice").unwrap();
    assert_eq!(&entry.serial, alice.serial());
    assert!(pki.path("crls/Test_Intermediate.crl").is_file());
    assert!(pki.path("crls/Test_Root.crl").is_file());
    assert_eq!(fs::read_to_string(pki.path("user_certs/alice.pem")).unwrap(), alice.to_pem());

    // Second call is answered from the cache
    assert!(store.validate(&alice).await);
    assert_eq!(pki.fetcher.crl_fetch_count(), 2);
}

#[tokio::test]
async fn subject_serial_number_is_the_id() {
    let pki = Pki::new();
    let mut store = pki.store();
    let mut params = pki.leaf_params("Alice Example", 11);
    params.distinguished_name.push(DnType::CustomDnType(vec![2, 5, 4, 5]), "BI123456");
    let alice = issue(params, &pki.intermediate);

    assert_eq!(alice.id(), "BI123456");
    assert!(store.validate(&alice).await);
    assert!(store.peer("BI123456").is_some());
    assert!(pki.path("user_certs/BI123456.pem").is_file());
}

#[tokio::test]
async fn cached_verdict_expires_after_a_day() {
    let pki = Pki::new();
    let mut store = pki.store();
    let alice = pki.leaf("alice", 10);
    assert!(store.validate(&alice).await);

    // Revoked upstream, but the cached verdict still stands
    pki.revoke_in_intermediate(&[10], date_time_ymd(2026, 1, 3));
    pki.env.advance(3600);
    assert!(store.validate(&alice).await);
    assert_eq!(pki.fetcher.crl_fetch_count(), 2);

    // A day later both the verdict and the CRLs are stale
    pki.env.advance(DAY);
    assert!(!store.validate(&alice).await);
    assert_eq!(pki.fetcher.crl_fetch_count(), 3);
    assert!(store.validity_cache().get("alice").is_none());
}

#[tokio::test]
async fn serial_change_bypasses_cache() {
    let pki = Pki::new();
    let mut store = pki.store();
    assert!(store.validate(&pki.leaf("alice", 10)).await);

    let renewed = pki.leaf("alice", 11);
    assert!(store.validate(&renewed).await);
    assert_eq!(&store.validity_cache().get("alice").unwrap().serial, renewed.serial());
    assert_eq!(fs::read_to_string(pki.path("user_certs/alice.pem")).unwrap(), renewed.to_pem());
}

#[tokio::test]
async fn peers_are_forgotten_when_verdict_expires() {
    let pki = Pki::new();
    let mut store = pki.store();
    assert!(store.validate(&pki.leaf("alice", 10)).await);
    assert!(pki.path("user_certs/alice.pem").is_file());

    // The CRLs are still fresh at their nextUpdate, alice's verdict is not
    pki.env.advance(DAY);
    assert!(store.validate(&pki.leaf("bob", 11)).await);

    assert!(store.peer("alice").is_none());
    assert!(store.validity_cache().get("alice").is_none());
    assert!(!pki.path("user_certs/alice.pem").exists());
    assert!(store.peer("bob").is_some());
}

#[tokio::test]
async fn rejected_peer_is_not_kept() {
    let pki = Pki::new();
    pki.revoke_in_intermediate(&[13], date_time_ymd(2026, 1, 2));
    let mut store = pki.store();

    assert!(!store.validate(&pki.leaf("alice", 13)).await);
    assert!(store.peer("alice").is_none());
    assert!(!pki.path("user_certs/alice.pem").exists());
}

#[tokio::test]
async fn renewed_certificate_on_fresh_crl_is_rejected() {
    let pki = Pki::new();
    pki.revoke_in_intermediate(&[12], date_time_ymd(2026, 1, 2));
    let mut store = pki.store();
    assert!(store.validate(&pki.leaf("alice", 10)).await);

    assert!(!store.validate(&pki.leaf("alice", 12)).await);
    assert!(store.validity_cache().get("alice").is_none());
}

#[tokio::test]
async fn missing_digital_signature_usage_is_rejected() {
    let pki = Pki::new();
    let mut store = pki.store();

    let mut params = pki.leaf_params("alice", 10);
    params.key_usages = vec![KeyUsagePurpose::KeyEncipherment];
    assert!(!store.validate(&issue(params, &pki.intermediate)).await);

    let mut params = pki.leaf_params("bob", 11);
    params.key_usages = Vec::new();
    assert!(!store.validate(&issue(params, &pki.intermediate)).await);

    assert_eq!(pki.fetcher.crl_fetch_count(), 0);
    assert!(store.peer("alice").is_none());
    assert!(store.validity_cache().is_empty());
}

#[tokio::test]
async fn unknown_issuer_is_rejected() {
    let pki = Pki::new();
    let mut store = pki.store();
    let rogue = authority("Rogue CA", 9, None, None);

    assert!(!store.validate(&issue(pki.leaf_params("mallory", 10), &rogue)).await);
    assert_eq!(pki.fetcher.crl_fetch_count(), 0);
}

#[tokio::test]
async fn local_ca_is_not_an_anchor() {
    let pki = Pki::new();
    let mut store = pki.store();
    let server_ca = authority("ServerCA", 4, None, None);

    assert!(!store.validate(&issue(base_params("alice", 10), &server_ca)).await);
}

#[tokio::test]
async fn revoked_by_issuer_crl() {
    let pki = Pki::new();
    pki.revoke_in_intermediate(&[13], date_time_ymd(2026, 1, 2));
    let mut store = pki.store();

    assert!(!store.validate(&pki.leaf("alice", 13)).await);
    assert!(store.validate(&pki.leaf("bob", 14)).await);
}

#[tokio::test]
async fn revoked_serial_in_any_cached_crl() {
    let pki = Pki::new();
    pki.fetcher.publish_crl(ROOT_CRL, crl(&pki.root, &[30], date_time_ymd(2026, 1, 2)));
    let mut store = pki.store();

    // Populates both CRLs
    assert!(store.validate(&pki.leaf("bob", 20)).await);
    assert_eq!(store.revocations().len(), 2);

    // Serial 30 is only listed by the root, not by carol's issuer
    assert!(!store.validate(&pki.leaf("carol", 30)).await);
}

#[tokio::test]
async fn revoked_intermediate_breaks_chain() {
    let pki = Pki::new();
    pki.fetcher.publish_crl(ROOT_CRL, crl(&pki.root, &[2], date_time_ymd(2026, 1, 2)));
    let mut store = pki.store();

    assert!(!store.validate(&pki.leaf("alice", 10)).await);
}

#[tokio::test]
async fn delta_crl_is_consulted() {
    let pki = Pki::new();
    let delta = crl(&pki.intermediate, &[15], date_time_ymd(2026, 1, 2));
    pki.fetcher.publish_crl(INTERMEDIATE_DELTA, delta);
    let mut store = pki.store();

    let mut params = pki.leaf_params("alice", 16);
    params.custom_extensions = vec![freshest_crl_extension(INTERMEDIATE_DELTA)];
    let alice = issue(params, &pki.intermediate);
    assert_eq!(alice.delta_crl_urls(), [INTERMEDIATE_DELTA]);
    assert!(store.validate(&alice).await);
    assert!(pki.fetcher.crl_requests().contains(&INTERMEDIATE_DELTA.to_string()));
    assert!(pki.path("crls/Test_Intermediate.delta.crl").is_file());

    let mut params = pki.leaf_params("bob", 15);
    params.custom_extensions = vec![freshest_crl_extension(INTERMEDIATE_DELTA)];
    assert!(!store.validate(&issue(params, &pki.intermediate)).await);
}

#[tokio::test]
async fn unreachable_crl_fails_closed() {
    let pki = Pki::new();
    pki.fetcher.withdraw_crl(INTERMEDIATE_CRL);
    let mut store = pki.store();

    assert!(!store.validate(&pki.leaf("alice", 10)).await);
    assert!(store.validity_cache().is_empty());
}

#[tokio::test]
async fn crl_from_wrong_issuer_is_rejected() {
    let pki = Pki::new();
    pki.fetcher.publish_crl(INTERMEDIATE_CRL, crl(&pki.root, &[], date_time_ymd(2026, 1, 2)));
    let mut store = pki.store();

    assert!(!store.validate(&pki.leaf("alice", 10)).await);
}

#[tokio::test]
async fn crl_signed_by_another_key_is_rejected() {
    let pki = Pki::new();
    pki.revoke_in_intermediate(&[10], date_time_ymd(2026, 1, 2));

    // Same name as the trusted intermediate, different key, empty list
    let impostor = authority("Test Intermediate", 2, Some(&pki.root), Some(ROOT_CRL));
    pki.fetcher.publish_crl(INTERMEDIATE_CRL, crl(&impostor, &[], date_time_ymd(2026, 1, 2)));
    let mut store = pki.store();

    assert!(!store.validate(&pki.leaf("alice", 10)).await);
    assert!(!store.validate(&pki.leaf("bob", 11)).await);
    assert!(store.revocations().is_empty());
    assert!(!pki.path("crls/Test_Intermediate.crl").exists());
    assert!(store.validity_cache().is_empty());
}

#[tokio::test]
async fn delta_crl_signed_by_another_key_is_rejected() {
    let pki = Pki::new();
    let impostor = authority("Test Intermediate", 2, Some(&pki.root), Some(ROOT_CRL));
    pki.fetcher.publish_crl(INTERMEDIATE_DELTA, crl(&impostor, &[], date_time_ymd(2026, 1, 2)));
    let mut store = pki.store();

    let mut params = pki.leaf_params("alice", 16);
    params.custom_extensions = vec![freshest_crl_extension(INTERMEDIATE_DELTA)];
    assert!(!store.validate(&issue(params, &pki.intermediate)).await);
    assert!(!pki.path("crls/Test_Intermediate.delta.crl").exists());
}

#[tokio::test]
async fn no_distribution_point_passes() {
    let pki = Pki::new();
    let mut store = pki.store();

    assert!(store.validate(&issue(base_params("alice", 10), &pki.intermediate)).await);
    assert_eq!(pki.fetcher.crl_requests(), vec![ROOT_CRL]);
}

#[tokio::test]
async fn expired_and_not_yet_valid_leaves_are_rejected() {
    let pki = Pki::new();
    let mut store = pki.store();

    let mut params = pki.leaf_params("alice", 10);
    params.not_after = date_time_ymd(2025, 6, 1);
    assert!(!store.validate(&issue(params, &pki.intermediate)).await);

    let mut params = pki.leaf_params("bob", 11);
    params.not_before = date_time_ymd(2026, 6, 1);
    assert!(!store.validate(&issue(params, &pki.intermediate)).await);
}

#[tokio::test]
async fn ocsp_good_skips_crl() {
    let pki = Pki::new();
    pki.fetcher.set_ocsp(OCSP_URL, Ok(OcspStatus::Good));
    let mut store = pki.store();

    let mut params = pki.leaf_params("alice", 10);
    params.custom_extensions = vec![ocsp_extension(OCSP_URL)];
    let alice = issue(params, &pki.intermediate);
    assert_eq!(alice.ocsp_urls(), [OCSP_URL]);

    assert!(store.validate(&alice).await);
    assert_eq!(pki.fetcher.crl_requests(), vec![ROOT_CRL]);

    let queries = pki.fetcher.ocsp_queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].subject_path, pki.path("user_certs/alice.pem"));
    assert_eq!(queries[0].issuer_path, pki.path("certs/intermediate.pem"));
    assert_eq!(queries[0].ca_bundle, pki.path("certs/ca_bundle.pem"));
    assert!(queries[0].subject_path.is_file());
}

#[tokio::test]
async fn ocsp_anything_but_good_is_rejected() {
    let answers = [
        Ok(OcspStatus::Revoked),
        Ok(OcspStatus::Unknown("unknown".to_string())),
        Err(FetchError::Timeout { url: OCSP_URL.to_string() }),
    ];

    for answer in answers {
        let pki = Pki::new();
        pki.fetcher.set_ocsp(OCSP_URL, answer);
        let mut store = pki.store();

        let mut params = pki.leaf_params("alice", 10);
        params.custom_extensions = vec![ocsp_extension(OCSP_URL)];
        assert!(!store.validate(&issue(params, &pki.intermediate)).await);
        assert!(!pki.fetcher.crl_requests().contains(&INTERMEDIATE_CRL.to_string()));
    }
}

#[tokio::test]
async fn forged_signature_evicts_cached_verdict() {
    let pki = Pki::new();
    let mut store = pki.store();
    assert!(store.validate(&pki.leaf("alice", 10)).await);

    // Same issuer name as the trusted intermediate, different key
    let impostor = authority("Test Intermediate", 2, Some(&pki.root), Some(ROOT_CRL));
    let forged = issue(pki.leaf_params("alice", 17), &impostor);

    assert!(!store.validate(&forged).await);
    assert!(store.validity_cache().get("alice").is_none());
}

#[tokio::test]
async fn check_revocation_reports_reason() {
    let pki = Pki::new();
    pki.revoke_in_intermediate(&[10], date_time_ymd(2026, 1, 2));
    let mut store = pki.store();

    let alice = pki.leaf("alice", 10);
    let entry = store.register_peer(&alice).unwrap();
    let issuer = store.trusted("Test Intermediate").cloned().unwrap();

    let err = store.check_revocation(&entry, &issuer, NOW as i64).await.unwrap_err();
    assert!(err.is_revocation_failure());
    assert_eq!(
        store.revocations().is_revoked_by("Test Intermediate", &Serial::from_bytes(&[10])),
        Some(true)
    );
}
