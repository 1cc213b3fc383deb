// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core cryptographic algorithms and random number generator.
//!
//! Algorithms:
//! - AES-256-GCM AEAD
//! - SHA256 HKDF
//! - Ed25519 DSA with PKCS8 / SPKI PEM encodings
//! - X25519 ECDH
//! - ECIES sealing for Welcome hand-offs
//!
//! Random Number Generator:
//! - ChaCha20 stream cipher, seeded from the operating system
use thiserror::Error;

pub mod aead;
pub mod ecies;
pub mod ed25519;
pub mod encoding;
pub mod hkdf;
mod rng;
mod secret;
pub mod sha2;
pub mod x25519;

pub use rng::Rng;
pub use secret::Secret;

/// Failures of the key-derivation and randomness primitives.
///
/// None of these are recoverable at the call site; they abort the surrounding operation.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("requested key material exceeds what hkdf can produce")]
    KeyDerivation,

    #[error("random number generator is poisoned")]
    RngPoisoned,
}
