// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-file cryptography: AEAD base blocks, signed delta records chained by ciphertext hash,
//! chain decryption and compaction.
mod differ;
mod pipeline;
mod record;

pub use differ::{DifferError, apply_patch, diff};
pub use pipeline::{
    DeltaError, compact, decrypt_chain, derive_file_key, encrypt_base, encrypt_delta,
};
pub use record::{DELTA_SEPARATOR, DeltaRecord, chain_hash, count_deltas};
