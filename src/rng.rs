//! Seedable random number generator for deterministic testing.
//!
//! Only non-secret randomness goes through here: session ids, ticket nonces,
//! padding choices. Key material always comes from the provider's
//! [`SecureRandom`](crate::crypto::SecureRandom). With a seed set in
//! [`Config`](crate::Config), handshakes that differ only in such values
//! become reproducible.

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// A random number generator that can be seeded for deterministic behavior.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    /// With `Some(seed)` the output is deterministic, with `None` it comes
    /// from the thread-local generator.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        match self.inner.as_mut() {
            Some(rng) => rng.gen(),
            None => rand::random(),
        }
    }

    pub fn fill(&mut self, dest: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(dest),
            None => rand::thread_rng().fill_bytes(dest),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}
