// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM authenticated symmetric encryption (AEAD) with 256-bit key, 16-byte tag and
//! 96-bit nonce.
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use thiserror::Error;

pub const AEAD_KEY_SIZE: usize = 32;

pub const AEAD_NONCE_SIZE: usize = 12;

pub const AEAD_TAG_SIZE: usize = 16;

pub type AeadKey = [u8; AEAD_KEY_SIZE];

pub type AeadNonce = [u8; AEAD_NONCE_SIZE];

/// Encrypts a plaintext, appending the authentication tag to the returned ciphertext.
pub fn aead_encrypt(
    key: &AeadKey,
    plaintext: &[u8],
    nonce: AeadNonce,
) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| AeadError::EncryptionFailed)
}

/// Decrypts a ciphertext carrying the authentication tag at its end.
pub fn aead_decrypt(
    key: &AeadKey,
    ciphertext_tag: &[u8],
    nonce: AeadNonce,
) -> Result<Vec<u8>, AeadError> {
    if ciphertext_tag.len() < AEAD_TAG_SIZE {
        return Err(AeadError::CiphertextTooShort(ciphertext_tag.len()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext_tag)
        .map_err(|_| AeadError::DecryptionFailed)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("could not encrypt with aead")]
    EncryptionFailed,

    #[error("aead ciphertext or tag does not match key and nonce")]
    DecryptionFailed,

    #[error("aead ciphertext of {0} bytes is missing its tag")]
    CiphertextTooShort(usize),
}
