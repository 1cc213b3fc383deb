// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-transform filter invoked by the host tool on stage and checkout.
//!
//! `clean` turns working-tree plaintext into a ciphertext chain, `smudge` turns stored chains
//! back into plaintext. Both pass data through untouched while the peer has not joined, so a
//! repository stays usable (as ciphertext) without local state.
mod cache;

use std::io;

use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::crypto::Rng;
use crate::crypto::ed25519::SigningKey;
use crate::delta::{
    self, DELTA_SEPARATOR, DeltaError, count_deltas, decrypt_chain, encrypt_base, encrypt_delta,
};
use crate::group::{ArchiveError, EpochArchive, Group, GroupError};
use crate::store::{self, Identity, RepoPaths, StoreError};

pub use cache::FilterCache;

/// Everything a filter invocation needs, loaded fresh per process.
pub struct FilterContext {
    pub identity: Identity,
    pub signing_key: SigningKey,
    pub group: Group,
    pub archive: EpochArchive,
    pub config: Config,
}

impl FilterContext {
    /// Loads filter state, returning `None` when this peer has not joined yet.
    ///
    /// When the committed state observed in the work tree is ahead of the local snapshot
    /// (someone else changed membership and we pulled), the group is ratcheted forward, the
    /// refreshed snapshot is persisted and the cache is dropped.
    pub fn load(paths: &RepoPaths) -> Result<Option<Self>, FilterError> {
        if !paths.local_state().exists() {
            return Ok(None);
        }

        let identity = store::read_identity(paths)?;
        let signing_key = store::read_signing_key(paths, None)?;
        let mut group = store::read_local_group(paths)?;

        if let Ok(committed) = store::read_committed_state(paths) {
            if group.sync_from_committed(&committed)? {
                store::write_local_group(paths, &group)?;
                FilterCache::new(paths.cache_dir()).invalidate_all()?;
                debug!(epoch = group.epoch(), "synced group state from committed blob");
            }
        }

        let exported = group.export_epoch_secret()?;
        let mut archive = match store::read_epoch_archive(paths) {
            Ok(data) => EpochArchive::decrypt(&data, &exported)?,
            Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                EpochArchive::new_with_secret(group.epoch(), exported)
            }
            Err(err) => return Err(err.into()),
        };
        if !archive.has(group.epoch()) {
            archive.add(group.epoch(), exported);
        }

        let config = store::read_config(paths)?;

        Ok(Some(Self {
            identity,
            signing_key,
            group,
            archive,
            config,
        }))
    }
}

/// Stage transform: plaintext to ciphertext chain.
pub fn clean(
    paths: &RepoPaths,
    file_path: &str,
    input: &[u8],
    rng: &Rng,
) -> Result<Vec<u8>, FilterError> {
    let Some(context) = FilterContext::load(paths)? else {
        return Ok(input.to_vec());
    };

    let epoch = context.group.epoch();
    let exported = *context.archive.get(epoch)?.as_bytes();
    let author = context.identity.member_id.as_str();
    let cache = FilterCache::new(paths.cache_dir());

    let cached_plain = cache.plaintext(file_path);
    let cached_ct = cache.ciphertext(file_path);

    if let (Some(plain), Some(ct)) = (&cached_plain, &cached_ct) {
        if plain == input {
            // Unchanged content stages to the identical ciphertext.
            return Ok(ct.clone().into_bytes());
        }
    }

    let chain = match (&cached_plain, &cached_ct) {
        (Some(plain), Some(ct)) => {
            match delta_texts(plain, input) {
                Some((old_text, new_text)) => {
                    let deltas = count_deltas(ct);
                    if deltas >= context.config.compaction_threshold {
                        debug!(path = file_path, deltas, "compacting chain into fresh base block");
                        encrypt_base(
                            input,
                            &exported,
                            file_path,
                            epoch,
                            author,
                            &context.signing_key,
                            rng,
                        )?
                    } else {
                        encrypt_delta(
                            &delta::diff(&old_text, &new_text),
                            &exported,
                            file_path,
                            epoch,
                            deltas + 1,
                            author,
                            &context.signing_key,
                            ct,
                            rng,
                        )?
                    }
                }
                // Binary content never goes through the patch format.
                None => encrypt_base(
                    input,
                    &exported,
                    file_path,
                    epoch,
                    author,
                    &context.signing_key,
                    rng,
                )?,
            }
        }
        _ => encrypt_base(
            input,
            &exported,
            file_path,
            epoch,
            author,
            &context.signing_key,
            rng,
        )?,
    };

    cache.put(file_path, input, &chain)?;
    Ok(chain.into_bytes())
}

/// Checkout transform: ciphertext chain back to plaintext.
pub fn smudge(paths: &RepoPaths, file_path: &str, input: &[u8]) -> Result<Vec<u8>, FilterError> {
    let Some(context) = FilterContext::load(paths)? else {
        return Ok(input.to_vec());
    };

    if !looks_like_ciphertext(input) {
        return Ok(input.to_vec());
    }
    let chain = std::str::from_utf8(input).expect("ciphertext detection implies utf-8");

    let archive = &context.archive;
    let plaintext = decrypt_chain(
        chain,
        file_path,
        |epoch| archive.get(epoch).ok().map(|secret| *secret.as_bytes()),
        |author| store::read_member_key(paths, author).ok(),
    )?;

    FilterCache::new(paths.cache_dir()).put(file_path, &plaintext, chain)?;
    Ok(plaintext)
}

/// Returns true when the data parses as the first block of a ciphertext chain: URL-safe
/// base64 of a JSON object carrying at least the `epoch`, `ct` and `iv` keys.
pub fn looks_like_ciphertext(data: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(data) else {
        return false;
    };
    let first_block = match text.find(DELTA_SEPARATOR) {
        Some(index) => &text[..index],
        None => text,
    };
    let first_block = first_block.trim();
    if first_block.is_empty() {
        return false;
    }

    let Ok(json) = crate::crypto::encoding::decode_url(first_block) else {
        return false;
    };
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&json) else {
        return false;
    };
    let Some(object) = value.as_object() else {
        return false;
    };
    ["epoch", "ct", "iv"]
        .iter()
        .all(|key| object.contains_key(*key))
}

fn delta_texts(old: &[u8], new: &[u8]) -> Option<(String, String)> {
    let old = String::from_utf8(old.to_vec()).ok()?;
    let new = String::from_utf8(new.to_vec()).ok()?;
    Some((old, new))
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Delta(#[from] DeltaError),
}
