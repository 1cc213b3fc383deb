// SPDX-License-Identifier: MIT OR Apache-2.0

//! DH encapsulation of a removal update secret towards the remaining members.
use serde::{Deserialize, Serialize};

use crate::crypto::aead::{AeadKey, AeadNonce, aead_decrypt, aead_encrypt};
use crate::crypto::hkdf::derive;
use crate::crypto::{Rng, Secret, encoding, x25519};
use crate::group::group::{EPOCH_SECRET_SIZE, GroupError};

const ENCAP_INFO: &[u8] = b"mlsgit-encap";

/// Ciphertext of the update secret for one leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncapEntry {
    pub leaf_index: u32,
    /// `nonce ‖ AES-256-GCM(enc_key, update_secret)`.
    #[serde(with = "encoding::serde_std")]
    pub ciphertext: Vec<u8>,
}

/// One epoch transition worth of encapsulations, emitted by a removal.
///
/// The ephemeral secret key is discarded right after sealing; only its public half travels in
/// committed state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEncap {
    pub from_epoch: u64,
    pub eph_pub: x25519::PublicKey,
    pub entries: Vec<EncapEntry>,
}

impl UpdateEncap {
    /// Seals `update_secret` towards every given `(leaf_index, init_pub)` recipient.
    pub(crate) fn seal(
        from_epoch: u64,
        recipients: &[(u32, x25519::PublicKey)],
        update_secret: &Secret<EPOCH_SECRET_SIZE>,
        rng: &Rng,
    ) -> Result<Self, GroupError> {
        let ephemeral = x25519::SecretKey::generate(rng)?;
        let eph_pub = ephemeral.public_key();

        let mut entries = Vec::with_capacity(recipients.len());
        for (leaf_index, init_pub) in recipients {
            let key = encap_key(&ephemeral.calculate_agreement(init_pub), from_epoch)?;
            let nonce: AeadNonce = rng.random_array()?;
            let mut ciphertext = nonce.to_vec();
            ciphertext.extend(aead_encrypt(&key, update_secret.as_bytes(), nonce)?);
            entries.push(EncapEntry {
                leaf_index: *leaf_index,
                ciphertext,
            });
        }

        Ok(Self {
            from_epoch,
            eph_pub,
            entries,
        })
    }

    /// Recovers the update secret for the given leaf using its init secret key.
    pub(crate) fn open(
        &self,
        leaf_index: u32,
        init_secret: &x25519::SecretKey,
    ) -> Result<Secret<EPOCH_SECRET_SIZE>, GroupError> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.leaf_index == leaf_index)
            .ok_or(GroupError::NotAMember(leaf_index))?;

        let nonce_size = std::mem::size_of::<AeadNonce>();
        if entry.ciphertext.len() < nonce_size {
            return Err(GroupError::Corrupted("encapsulation ciphertext too short"));
        }
        let nonce: AeadNonce = entry.ciphertext[..nonce_size]
            .try_into()
            .expect("checked ciphertext length");

        let key = encap_key(&init_secret.calculate_agreement(&self.eph_pub), self.from_epoch)?;
        let plaintext = aead_decrypt(&key, &entry.ciphertext[nonce_size..], nonce)?;
        let bytes: [u8; EPOCH_SECRET_SIZE] = plaintext
            .try_into()
            .map_err(|_| GroupError::Corrupted("update secret has wrong length"))?;
        Ok(Secret::from_bytes(bytes))
    }
}

fn encap_key(shared: &[u8; 32], from_epoch: u64) -> Result<AeadKey, GroupError> {
    Ok(derive(shared, &from_epoch.to_be_bytes(), Some(ENCAP_INFO))?)
}
