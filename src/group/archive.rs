// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted archive of exported epoch secrets for historical file decryption.
//!
//! New members receive the archive so they can read files whose chains still contain records
//! from earlier epochs (no backward secrecy, by design). The archive is encrypted under a key
//! derived from the current exported epoch secret, so it must be re-encrypted whenever the
//! epoch advances.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::crypto::aead::{AEAD_NONCE_SIZE, AeadError, AeadNonce, aead_decrypt, aead_encrypt};
use crate::crypto::{CryptoError, Rng, Secret, encoding};
use crate::delta::{DeltaError, derive_file_key};
use crate::group::group::EPOCH_SECRET_SIZE;

/// Pseudo-path under which the archive key is derived, pinned to epoch 0.
const ARCHIVE_KEY_PATH: &str = "mlsgit-archive";

#[derive(Debug, Default)]
pub struct EpochArchive {
    secrets: BTreeMap<u64, Secret<EPOCH_SECRET_SIZE>>,
}

impl EpochArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_secret(epoch: u64, exported_secret: [u8; EPOCH_SECRET_SIZE]) -> Self {
        let mut archive = Self::new();
        archive.add(epoch, exported_secret);
        archive
    }

    /// Records the exported secret for an epoch.
    pub fn add(&mut self, epoch: u64, exported_secret: [u8; EPOCH_SECRET_SIZE]) {
        self.secrets.insert(epoch, Secret::from_bytes(exported_secret));
    }

    pub fn get(&self, epoch: u64) -> Result<&Secret<EPOCH_SECRET_SIZE>, ArchiveError> {
        self.secrets
            .get(&epoch)
            .ok_or(ArchiveError::UnknownEpoch(epoch))
    }

    pub fn has(&self, epoch: u64) -> bool {
        self.secrets.contains_key(&epoch)
    }

    pub fn epochs(&self) -> Vec<u64> {
        self.secrets.keys().copied().collect()
    }

    pub fn latest_epoch(&self) -> Option<u64> {
        self.secrets.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Encrypts the archive under the key derived from the current exported epoch secret.
    /// Returns `nonce ‖ ciphertext+tag`.
    pub fn encrypt(
        &self,
        current_exported_secret: &[u8; EPOCH_SECRET_SIZE],
        rng: &Rng,
    ) -> Result<Vec<u8>, ArchiveError> {
        let plaintext = self.to_json_bytes()?;
        let key = archive_key(current_exported_secret)?;
        let nonce: AeadNonce = rng.random_array()?;
        let mut out = nonce.to_vec();
        out.extend(aead_encrypt(&key, &plaintext, nonce)?);
        Ok(out)
    }

    /// Decrypts an archive blob produced by [`EpochArchive::encrypt`].
    pub fn decrypt(
        data: &[u8],
        current_exported_secret: &[u8; EPOCH_SECRET_SIZE],
    ) -> Result<Self, ArchiveError> {
        if data.len() < AEAD_NONCE_SIZE {
            return Err(ArchiveError::TooShort(data.len()));
        }
        let nonce: AeadNonce = data[..AEAD_NONCE_SIZE]
            .try_into()
            .expect("checked archive length");
        let key = archive_key(current_exported_secret)?;
        let plaintext = aead_decrypt(&key, &data[AEAD_NONCE_SIZE..], nonce)?;
        Self::from_json_bytes(&plaintext)
    }

    /// Inner plaintext form: `{"<epoch>": "<b64url secret>", ...}`.
    fn to_json_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut object = serde_json::Map::new();
        for (epoch, secret) in &self.secrets {
            object.insert(
                epoch.to_string(),
                serde_json::Value::String(encoding::encode_url(secret.as_bytes())),
            );
        }
        Ok(serde_json::to_vec(&serde_json::Value::Object(object))?)
    }

    fn from_json_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let object: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
        let mut archive = Self::new();
        for (epoch, encoded) in object {
            let epoch: u64 = epoch
                .parse()
                .map_err(|_| ArchiveError::Corrupted("non-numeric epoch key"))?;
            let secret = encoding::decode_url(&encoded)
                .map_err(|_| ArchiveError::Corrupted("undecodable epoch secret"))?;
            let secret: [u8; EPOCH_SECRET_SIZE] = secret
                .try_into()
                .map_err(|_| ArchiveError::Corrupted("epoch secret has wrong length"))?;
            archive.add(epoch, secret);
        }
        Ok(archive)
    }
}

fn archive_key(
    current_exported_secret: &[u8; EPOCH_SECRET_SIZE],
) -> Result<[u8; 32], ArchiveError> {
    Ok(derive_file_key(current_exported_secret, ARCHIVE_KEY_PATH, 0)?)
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("epoch {0} not in archive")]
    UnknownEpoch(u64),

    #[error("archive blob of {0} bytes is missing its nonce")]
    TooShort(usize),

    #[error("corrupted archive: {0}")]
    Corrupted(&'static str),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error(transparent)]
    KeyDerivation(#[from] DeltaError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
