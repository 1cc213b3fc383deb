// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::crypto::{encoding, sha2::sha2_256};
use crate::delta::pipeline::DeltaError;

/// Separator between blocks of a ciphertext chain. Exactly these 21 bytes.
pub const DELTA_SEPARATOR: &str = "\n---MLSGIT-DELTA---\n";

/// One encrypted block of a ciphertext chain.
///
/// The first record of a chain is the base block (`seq == 0`, empty `prev_hash`), every later
/// record carries an encrypted patch over the previously reconstructed plaintext and commits
/// to the entire preceding chain via `prev_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub epoch: u64,
    pub seq: u32,
    #[serde(with = "encoding::serde_url")]
    pub iv: Vec<u8>,
    /// Ciphertext including the 16-byte tag.
    #[serde(with = "encoding::serde_url")]
    pub ct: Vec<u8>,
    #[serde(with = "encoding::serde_url")]
    pub sig: Vec<u8>,
    pub author: String,
    /// Lowercase hex SHA-256 over all preceding chain bytes, separators included.
    pub prev_hash: String,
    pub file_path: String,
}

impl DeltaRecord {
    /// Wire form: URL-safe unpadded base64 of the record's JSON.
    pub fn to_b64(&self) -> Result<String, DeltaError> {
        Ok(encoding::encode_url(&serde_json::to_vec(self)?))
    }

    pub fn from_b64(encoded: &str) -> Result<Self, DeltaError> {
        let bytes = encoding::decode_url(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Hash commitment over a chain prefix: lowercase hex of SHA-256 over the raw string.
pub fn chain_hash(chain: &str) -> String {
    hex::encode(sha2_256(&[chain.as_bytes()]))
}

/// Number of delta blocks in a chain, i.e. records minus the base block.
pub fn count_deltas(chain: &str) -> u32 {
    chain.matches(DELTA_SEPARATOR).count() as u32
}
