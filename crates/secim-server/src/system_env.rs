//! Production Environment implementation using the system clock and RNG.
//!
//! `SystemEnv` backs every [`SecureSession`](secim_core::SecureSession) and
//! the [`TrustStore`](secim_core::TrustStore) in the running server. Key
//! pairs, salts and IVs come from the OS RNG; certificate validity, CRL
//! freshness and cache ageing are judged against the system wall clock.

use secim_core::Environment;

/// Production environment using the system clock and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A server without functioning cryptographic
/// randomness cannot mint ephemeral keys, salts or IVs, and continuing would
/// compromise every session.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - server cannot operate securely");
    }

    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs()
    }
}
