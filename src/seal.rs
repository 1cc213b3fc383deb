// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integrity sealing: a signed Merkle root over all tracked ciphertexts.
//!
//! Sealing lets any member attest to the exact encrypted contents of the repository at an
//! epoch; verification distinguishes a content mismatch from a bad signature.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::ed25519::{Ed25519Error, Signature, SigningKey, VerifyingKey};
use crate::crypto::sha2::sha2_256;
use crate::crypto::encoding;

/// Merkle leaf: `SHA-256(path ‖ SHA-256(ciphertext))`.
pub fn leaf_hash(file_path: &str, ciphertext: &[u8]) -> [u8; 32] {
    let ct_hash = sha2_256(&[ciphertext]);
    sha2_256(&[file_path.as_bytes(), &ct_hash])
}

/// A file path paired with its leaf hash.
#[derive(Clone, Debug)]
pub struct FileHash {
    pub path: String,
    pub hash: [u8; 32],
}

impl FileHash {
    pub fn new(path: impl Into<String>, ciphertext: &[u8]) -> Self {
        let path = path.into();
        let hash = leaf_hash(&path, ciphertext);
        Self { path, hash }
    }
}

/// Computes the hex Merkle root over the given leaves.
///
/// Leaves are sorted by path first, so the root does not depend on input ordering. Odd nodes
/// are paired with themselves. Returns `None` for an empty tree.
pub fn merkle_root(mut leaves: Vec<FileHash>) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }
    leaves.sort_by(|a, b| a.path.cmp(&b.path));

    let mut nodes: Vec<[u8; 32]> = leaves.into_iter().map(|leaf| leaf.hash).collect();
    while nodes.len() > 1 {
        let mut next_level = Vec::with_capacity(nodes.len().div_ceil(2));
        for pair in nodes.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next_level.push(sha2_256(&[left, right]));
        }
        nodes = next_level;
    }

    Some(hex::encode(nodes[0]))
}

/// The signed manifest written to the shared state directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub root_hash: String,
    #[serde(with = "encoding::serde_std")]
    pub signature: Vec<u8>,
    pub author: String,
    pub epoch: u64,
    pub file_count: u64,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    merkle: Manifest,
}

impl Manifest {
    pub fn to_toml(&self) -> Result<String, SealError> {
        Ok(toml::to_string(&ManifestFile {
            merkle: self.clone(),
        })?)
    }

    pub fn from_toml(text: &str) -> Result<Self, SealError> {
        let file: ManifestFile = toml::from_str(text)?;
        Ok(file.merkle)
    }
}

/// Builds and signs a manifest over the given leaves.
pub fn seal(
    leaves: Vec<FileHash>,
    author: &str,
    epoch: u64,
    signing_key: &SigningKey,
) -> Result<Manifest, SealError> {
    let file_count = leaves.len() as u64;
    let root_hash = merkle_root(leaves).ok_or(SealError::NoFiles)?;
    let signature = signing_key.sign(root_hash.as_bytes());
    Ok(Manifest {
        root_hash,
        signature: signature.to_bytes().to_vec(),
        author: author.to_string(),
        epoch,
        file_count,
    })
}

/// Recomputes the root over the given leaves and checks it against the manifest.
///
/// A content change reports `RootMismatch`; a forged or damaged manifest reports
/// `SignatureInvalid`.
pub fn verify(
    leaves: Vec<FileHash>,
    manifest: &Manifest,
    author_key: &VerifyingKey,
) -> Result<(), SealError> {
    let computed = merkle_root(leaves).ok_or(SealError::NoFiles)?;
    if computed != manifest.root_hash {
        return Err(SealError::RootMismatch {
            expected: manifest.root_hash.clone(),
            computed,
        });
    }

    let signature: [u8; 64] = manifest
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| SealError::SignatureInvalid)?;
    author_key
        .verify(
            manifest.root_hash.as_bytes(),
            &Signature::from_bytes(signature),
        )
        .map_err(|_| SealError::SignatureInvalid)
}

#[derive(Debug, Error)]
pub enum SealError {
    #[error("no tracked ciphertexts to seal")]
    NoFiles,

    #[error("merkle root mismatch: manifest has {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },

    #[error("manifest signature verification failed")]
    SignatureInvalid,

    #[error(transparent)]
    TomlSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    TomlParse(#[from] toml::de::Error),

    #[error(transparent)]
    Key(#[from] Ed25519Error),
}
