// SPDX-License-Identifier: MIT OR Apache-2.0

//! ECIES sealing over X25519 for Welcome hand-offs.
//!
//! A fresh ephemeral key pair is sampled per message, the AEAD key is derived from the
//! agreement with HKDF and the wire form is `eph_pub(32) ‖ nonce(12) ‖ ciphertext+tag`.
use thiserror::Error;

use crate::crypto::aead::{
    AEAD_NONCE_SIZE, AEAD_TAG_SIZE, AeadError, AeadKey, AeadNonce, aead_decrypt, aead_encrypt,
};
use crate::crypto::hkdf::derive;
use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey, SecretKey};
use crate::crypto::{CryptoError, Rng};

const WELCOME_INFO: &[u8] = b"mlsgit-welcome";

/// Minimum blob length: ephemeral public key, nonce and tag.
pub const SEALED_OVERHEAD: usize = PUBLIC_KEY_SIZE + AEAD_NONCE_SIZE + AEAD_TAG_SIZE;

/// Encrypts a payload towards the holder of the secret counterpart of `recipient`.
pub fn seal(recipient: &PublicKey, plaintext: &[u8], rng: &Rng) -> Result<Vec<u8>, EciesError> {
    let ephemeral = SecretKey::generate(rng)?;
    let shared = ephemeral.calculate_agreement(recipient);
    let key: AeadKey = derive(&shared, b"", Some(WELCOME_INFO))?;

    let nonce: AeadNonce = rng.random_array()?;
    let ciphertext = aead_encrypt(&key, plaintext, nonce)?;

    let mut out = Vec::with_capacity(SEALED_OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral.public_key().as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`seal`].
pub fn open(recipient: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>, EciesError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(EciesError::TooShort(sealed.len()));
    }

    let eph_pub: [u8; PUBLIC_KEY_SIZE] = sealed[..PUBLIC_KEY_SIZE]
        .try_into()
        .expect("checked sealed length");
    let nonce: AeadNonce = sealed[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + AEAD_NONCE_SIZE]
        .try_into()
        .expect("checked sealed length");
    let ciphertext = &sealed[PUBLIC_KEY_SIZE + AEAD_NONCE_SIZE..];

    let shared = recipient.calculate_agreement(&PublicKey::from_bytes(eph_pub));
    let key: AeadKey = derive(&shared, b"", Some(WELCOME_INFO))?;

    Ok(aead_decrypt(&key, ciphertext, nonce)?)
}

#[derive(Debug, Error)]
pub enum EciesError {
    #[error("sealed blob of {0} bytes is shorter than the minimum of 60")]
    TooShort(usize),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
