//! Certificate trust engine.
//!
//! - [`certificate`]: owned X.509 certificates and their ids
//! - [`revocation`]: cached CRLs and delta CRLs per issuer
//! - [`validity`]: 24-hour cache of positive verdicts
//! - [`fetch`]: CRL/OCSP retrieval seam and an in-memory implementation
//! - [`store`]: the engine tying them together

pub mod certificate;
pub mod fetch;
pub mod revocation;
pub mod store;
pub mod validity;

pub use certificate::{Certificate, Serial};
pub use fetch::{MemoryFetcher, OcspQuery, OcspStatus, RevocationFetcher};
pub use revocation::{Crl, RevocationCache, RevocationRecord};
pub use store::{
    DEFAULT_CA_LABEL, DEFAULT_IDENTITY_LABEL, MAX_CHAIN_DEPTH, TrustConfig, TrustStore,
    TrustedEntry,
};
pub use validity::{VALIDITY_TTL_SECS, ValidityCache, ValidityCacheEntry};
