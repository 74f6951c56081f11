//! Owned X.509 certificates.
//!
//! Certificates are parsed once with `x509-parser` and the fields the trust
//! engine consults are copied out, so a [`Certificate`] can be stored and
//! cloned freely. Signature checks re-parse the retained DER on demand.
//!
//! A certificate's *id* is the `serialNumber` attribute of its subject name
//! (OID 2.5.4.5), falling back to the common name. This is unrelated to the
//! integer [`Serial`] that CRLs list.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use x509_parser::{
    extensions::{CRLDistributionPoints, DistributionPointName, GeneralName, ParsedExtension},
    parse_x509_certificate,
    prelude::FromDer,
    x509::X509Name,
};

use crate::error::CertificateError;

const OID_SUBJECT_SERIAL_NUMBER: &str = "2.5.4.5";
const OID_FRESHEST_CRL: &str = "2.5.29.46";
const OID_ACCESS_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// PEM label for certificates.
pub const PEM_CERTIFICATE: &str = "CERTIFICATE";

/// Integer serial number as its big-endian bytes, without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(Vec<u8>);

impl Serial {
    /// Normalise raw INTEGER content bytes.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let start = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
        Self(raw[start..].to_vec())
    }

    /// Big-endian bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("00");
        }
        f.write_str(&hex::encode(&self.0))
    }
}

/// A parsed X.509 certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    id: String,
    issuer_id: String,
    serial: Serial,
    not_before: i64,
    not_after: i64,
    digital_signature: Option<bool>,
    crl_urls: Vec<String>,
    delta_crl_urls: Vec<String>,
    ocsp_urls: Vec<String>,
}

impl Certificate {
    /// Parse DER bytes.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let (_, cert) =
            parse_x509_certificate(der).map_err(|e| CertificateError::new(e.to_string()))?;

        let digital_signature = cert
            .key_usage()
            .map_err(|e| CertificateError::new(format!("KeyUsage: {e}")))?
            .map(|ku| ku.value.digital_signature());

        let mut crl_urls = Vec::new();
        let mut delta_crl_urls = Vec::new();
        let mut ocsp_urls = Vec::new();

        for ext in cert.extensions() {
            // freshestCRL shares the CRLDistributionPoints syntax
            if ext.oid.to_id_string() == OID_FRESHEST_CRL {
                delta_crl_urls.extend(freshest_crl_uris(ext.value)?);
                continue;
            }
            match ext.parsed_extension() {
                ParsedExtension::CRLDistributionPoints(points) => {
                    crl_urls.extend(distribution_point_uris(points));
                },
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        if desc.access_method.to_id_string() == OID_ACCESS_OCSP {
                            ocsp_urls.extend(uri(&desc.access_location));
                        }
                    }
                },
                _ => {},
            }
        }

        Ok(Self {
            der: der.to_vec(),
            id: name_id(cert.subject()),
            issuer_id: name_id(cert.issuer()),
            serial: Serial::from_bytes(cert.tbs_certificate.raw_serial()),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            digital_signature,
            crl_urls,
            delta_crl_urls,
            ocsp_urls,
        })
    }

    /// Parse a PEM `CERTIFICATE` block.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, CertificateError> {
        let block = pem::parse(pem_bytes).map_err(|e| CertificateError::new(e.to_string()))?;
        if block.tag() != PEM_CERTIFICATE {
            return Err(CertificateError::new(format!("unexpected PEM label {}", block.tag())));
        }
        Self::from_der(block.contents())
    }

    /// Parse PEM, falling back to DER.
    pub fn parse(bytes: &[u8]) -> Result<Self, CertificateError> {
        Self::from_pem(bytes).or_else(|_| Self::from_der(bytes))
    }

    /// Decode the wire form: base64 of PEM.
    pub fn from_wire(encoded: &str) -> Result<Self, CertificateError> {
        let pem_bytes =
            STANDARD.decode(encoded).map_err(|e| CertificateError::new(format!("base64: {e}")))?;
        Self::from_pem(&pem_bytes)
    }

    /// Encode the wire form: base64 of PEM.
    pub fn to_wire(&self) -> String {
        STANDARD.encode(self.to_pem())
    }

    /// PEM encoding.
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PEM_CERTIFICATE, self.der.clone()))
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Issuer id.
    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// Integer serial number.
    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Start of the validity window (Unix seconds).
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of the validity window (Unix seconds).
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Whether `now` falls inside the validity window (inclusive).
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Whether subject and issuer ids coincide.
    pub fn is_self_issued(&self) -> bool {
        self.id == self.issuer_id
    }

    /// Whether a KeyUsage extension asserts digitalSignature.
    pub fn has_digital_signature_usage(&self) -> bool {
        self.digital_signature == Some(true)
    }

    /// CRL distribution point URLs.
    pub fn crl_urls(&self) -> &[String] {
        &self.crl_urls
    }

    /// Freshest-CRL (delta) URLs.
    pub fn delta_crl_urls(&self) -> &[String] {
        &self.delta_crl_urls
    }

    /// OCSP responder URLs from AuthorityInfoAccess.
    pub fn ocsp_urls(&self) -> &[String] {
        &self.ocsp_urls
    }

    /// Verify this certificate's signature with `issuer`'s public key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), CertificateError> {
        let (_, cert) =
            parse_x509_certificate(&self.der).map_err(|e| CertificateError::new(e.to_string()))?;
        let (_, issuer_cert) = parse_x509_certificate(&issuer.der)
            .map_err(|e| CertificateError::new(e.to_string()))?;

        cert.verify_signature(Some(issuer_cert.public_key()))
            .map_err(|e| CertificateError::new(format!("signature by {}: {e}", issuer.id)))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id)
            .field("issuer_id", &self.issuer_id)
            .field("serial", &format_args!("{}", self.serial))
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Canonical id of a distinguished name.
pub(crate) fn name_id(name: &X509Name<'_>) -> String {
    let by_serial_number = name
        .iter_attributes()
        .filter(|attr| attr.attr_type().to_id_string() == OID_SUBJECT_SERIAL_NUMBER)
        .find_map(|attr| attr.as_str().ok());
    if let Some(id) = by_serial_number {
        return id.to_string();
    }

    name.iter_common_name()
        .find_map(|attr| attr.as_str().ok())
        .map_or_else(|| name.to_string(), str::to_string)
}

fn uri(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::URI(uri) => Some((*uri).to_string()),
        _ => None,
    }
}

fn distribution_point_uris(points: &CRLDistributionPoints<'_>) -> Vec<String> {
    points
        .iter()
        .filter_map(|point| match &point.distribution_point {
            Some(DistributionPointName::FullName(names)) => Some(names),
            _ => None,
        })
        .flat_map(|names| names.iter().filter_map(uri))
        .collect()
}

fn freshest_crl_uris(value: &[u8]) -> Result<Vec<String>, CertificateError> {
    let (_, points) = CRLDistributionPoints::from_der(value)
        .map_err(|e| CertificateError::new(format!("freshestCRL: {e}")))?;
    Ok(distribution_point_uris(&points))
}
