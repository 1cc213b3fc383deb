// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Mutex;

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use crate::crypto::CryptoError;

/// Source of randomness for everything the crate samples: epoch and update secrets, key
/// pairs, AEAD nonces.
///
/// The handle is passed explicitly into each sampling operation, which keeps those sites
/// visible in signatures and gives tests a deterministic substitute. Backed by a ChaCha20
/// stream cipher seeded from the operating system.
#[derive(Debug)]
pub struct Rng {
    inner: Mutex<ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self::wrap(ChaCha20Rng::from_entropy())
    }
}

impl Rng {
    fn wrap(rng: ChaCha20Rng) -> Self {
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Fixed-seed generator for reproducible tests. Never available to production code.
    #[cfg(test)]
    pub(crate) fn from_seed(seed: [u8; 32]) -> Self {
        Self::wrap(ChaCha20Rng::from_seed(seed))
    }

    /// Fills a fixed-size buffer with fresh randomness.
    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], CryptoError> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }

    /// Samples `len` fresh random bytes.
    pub fn random_vec(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut out = vec![0u8; len];
        self.fill(&mut out)?;
        Ok(out)
    }

    fn fill(&self, out: &mut [u8]) -> Result<(), CryptoError> {
        let mut inner = self.inner.lock().map_err(|_| CryptoError::RngPoisoned)?;
        inner.fill_bytes(out);
        Ok(())
    }
}
