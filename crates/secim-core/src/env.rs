//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol and trust logic from system resources (wall clock,
//! randomness). Production code runs against the OS clock and RNG; tests pin
//! the clock and seed the RNG so certificate expiry, cache ageing and key
//! material are reproducible.

use rand_core::{CryptoRng, RngCore};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Seconds since the Unix epoch.
    ///
    /// Certificate validity windows, CRL freshness and the validity cache
    /// are all judged against this clock.
    fn wall_clock_secs(&self) -> u64;

    /// Wall clock as a signed timestamp, the form X.509 times compare in.
    fn unix_time(&self) -> i64 {
        i64::try_from(self.wall_clock_secs()).unwrap_or(i64::MAX)
    }

    /// Borrow this environment as a `rand_core` generator.
    fn rng(&self) -> EnvRng<'_, Self> {
        EnvRng { env: self }
    }
}

/// Adapter exposing an [`Environment`] as a `rand_core` CSPRNG.
///
/// Key generation in `secim_crypto` takes a generator rather than an
/// environment; this bridges the two.
pub struct EnvRng<'a, E: ?Sized> {
    env: &'a E,
}

impl<E: Environment> RngCore for EnvRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.env.random_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.env.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.env.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.env.random_bytes(dest);
        Ok(())
    }
}

impl<E: Environment> CryptoRng for EnvRng<'_, E> {}
