// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypt-then-sign pipeline producing the per-file ciphertext chain.
use thiserror::Error;

use crate::crypto::aead::{AeadError, AeadKey, AeadNonce, aead_decrypt, aead_encrypt};
use crate::crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use crate::crypto::hkdf::derive;
use crate::crypto::{CryptoError, Rng};
use crate::delta::differ::{DifferError, apply_patch};
use crate::delta::record::{DELTA_SEPARATOR, DeltaRecord, chain_hash};

const FILE_KEY_INFO: &[u8] = b"mlsgit-file-key";

/// Derives the AES key for one file at one epoch from the exported epoch secret.
///
/// Any change of secret, path or epoch yields an unrelated key.
pub fn derive_file_key(
    exported_secret: &[u8; 32],
    file_path: &str,
    epoch: u64,
) -> Result<AeadKey, DeltaError> {
    let mut info = Vec::with_capacity(FILE_KEY_INFO.len() + 8);
    info.extend_from_slice(FILE_KEY_INFO);
    info.extend_from_slice(&epoch.to_be_bytes());
    Ok(derive(exported_secret, file_path.as_bytes(), Some(&info))?)
}

/// Encrypts a full plaintext as the initial base block of a chain.
pub fn encrypt_base(
    plaintext: &[u8],
    exported_secret: &[u8; 32],
    file_path: &str,
    epoch: u64,
    author: &str,
    signing_key: &SigningKey,
    rng: &Rng,
) -> Result<String, DeltaError> {
    let record = encrypt_record(
        plaintext,
        exported_secret,
        file_path,
        epoch,
        0,
        author,
        String::new(),
        signing_key,
        rng,
    )?;
    record.to_b64()
}

/// Encrypts a patch and appends it to an existing chain.
#[allow(clippy::too_many_arguments)]
pub fn encrypt_delta(
    delta_text: &str,
    exported_secret: &[u8; 32],
    file_path: &str,
    epoch: u64,
    seq: u32,
    author: &str,
    signing_key: &SigningKey,
    prev_chain: &str,
    rng: &Rng,
) -> Result<String, DeltaError> {
    let record = encrypt_record(
        delta_text.as_bytes(),
        exported_secret,
        file_path,
        epoch,
        seq,
        author,
        chain_hash(prev_chain),
        signing_key,
        rng,
    )?;
    Ok(format!(
        "{prev_chain}{DELTA_SEPARATOR}{}",
        record.to_b64()?
    ))
}

#[allow(clippy::too_many_arguments)]
fn encrypt_record(
    plaintext: &[u8],
    exported_secret: &[u8; 32],
    file_path: &str,
    epoch: u64,
    seq: u32,
    author: &str,
    prev_hash: String,
    signing_key: &SigningKey,
    rng: &Rng,
) -> Result<DeltaRecord, DeltaError> {
    let key = derive_file_key(exported_secret, file_path, epoch)?;
    let iv: AeadNonce = rng.random_array()?;
    let ct = aead_encrypt(&key, plaintext, iv)?;

    let mut signed = iv.to_vec();
    signed.extend_from_slice(&ct);
    let sig = signing_key.sign(&signed);

    Ok(DeltaRecord {
        epoch,
        seq,
        iv: iv.to_vec(),
        ct,
        sig: sig.to_bytes().to_vec(),
        author: author.to_string(),
        prev_hash,
        file_path: file_path.to_string(),
    })
}

/// Decrypts a full chain back into the final plaintext.
///
/// Lookups for epoch secrets and author keys are passed in as capabilities so that offline
/// batch decryption and historical reads stay possible. Records may carry their own path;
/// the caller-provided one is used when a record's is empty.
pub fn decrypt_chain<S, P>(
    chain: &str,
    file_path: &str,
    epoch_secret: S,
    author_key: P,
) -> Result<Vec<u8>, DeltaError>
where
    S: Fn(u64) -> Option<[u8; 32]>,
    P: Fn(&str) -> Option<VerifyingKey>,
{
    if chain.is_empty() {
        return Err(DeltaError::EmptyChain);
    }
    let blocks: Vec<&str> = chain.split(DELTA_SEPARATOR).collect();

    let base = DeltaRecord::from_b64(blocks[0])?;
    let base_plaintext = decrypt_record(&base, 0, file_path, &epoch_secret, &author_key)?;
    if blocks.len() == 1 {
        // A chain of one base block round-trips arbitrary bytes.
        return Ok(base_plaintext);
    }

    let mut text = String::from_utf8(base_plaintext)?;
    let mut prev_chain = blocks[0].to_string();
    for (index, block) in blocks.iter().enumerate().skip(1) {
        let record = DeltaRecord::from_b64(block)?;

        if record.prev_hash != chain_hash(&prev_chain) {
            return Err(DeltaError::ChainBroken { index });
        }

        let delta_bytes = decrypt_record(&record, index, file_path, &epoch_secret, &author_key)?;
        let delta_text = String::from_utf8(delta_bytes)?;
        text = apply_patch(&text, &delta_text)?;

        prev_chain.push_str(DELTA_SEPARATOR);
        prev_chain.push_str(block);
    }

    Ok(text.into_bytes())
}

fn decrypt_record<S, P>(
    record: &DeltaRecord,
    index: usize,
    fallback_path: &str,
    epoch_secret: &S,
    author_key: &P,
) -> Result<Vec<u8>, DeltaError>
where
    S: Fn(u64) -> Option<[u8; 32]>,
    P: Fn(&str) -> Option<VerifyingKey>,
{
    let public_key = author_key(&record.author).ok_or_else(|| DeltaError::UnknownAuthor {
        author: record.author.clone(),
    })?;

    let mut signed = record.iv.clone();
    signed.extend_from_slice(&record.ct);
    let sig: [u8; 64] = record
        .sig
        .as_slice()
        .try_into()
        .map_err(|_| DeltaError::Corrupted("signature has wrong length"))?;
    if public_key
        .verify(&signed, &Signature::from_bytes(sig))
        .is_err()
    {
        return Err(DeltaError::SignatureInvalid {
            index,
            author: record.author.clone(),
        });
    }

    let path = if record.file_path.is_empty() {
        fallback_path
    } else {
        &record.file_path
    };
    let secret = epoch_secret(record.epoch).ok_or(DeltaError::MissingEpochSecret {
        epoch: record.epoch,
    })?;
    let key = derive_file_key(&secret, path, record.epoch)?;

    let iv: AeadNonce = record
        .iv
        .as_slice()
        .try_into()
        .map_err(|_| DeltaError::Corrupted("iv has wrong length"))?;
    Ok(aead_decrypt(&key, &record.ct, iv)?)
}

/// Decrypts the full chain and re-encrypts it as a single base block under a new epoch.
///
/// Emitted when a chain grows past the compaction threshold or after a member removal.
#[allow(clippy::too_many_arguments)]
pub fn compact<S, P>(
    chain: &str,
    file_path: &str,
    epoch_secret: S,
    author_key: P,
    new_exported_secret: &[u8; 32],
    new_epoch: u64,
    author: &str,
    signing_key: &SigningKey,
    rng: &Rng,
) -> Result<String, DeltaError>
where
    S: Fn(u64) -> Option<[u8; 32]>,
    P: Fn(&str) -> Option<VerifyingKey>,
{
    let plaintext = decrypt_chain(chain, file_path, epoch_secret, author_key)?;
    encrypt_base(
        &plaintext,
        new_exported_secret,
        file_path,
        new_epoch,
        author,
        signing_key,
        rng,
    )
}

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("ciphertext chain is empty")]
    EmptyChain,

    #[error("signature verification failed on block {index} (author {author})")]
    SignatureInvalid { index: usize, author: String },

    #[error("hash chain broken at block {index}")]
    ChainBroken { index: usize },

    #[error("no epoch secret available for epoch {epoch}")]
    MissingEpochSecret { epoch: u64 },

    #[error("no public key known for author {author}")]
    UnknownAuthor { author: String },

    #[error("corrupted record: {0}")]
    Corrupted(&'static str),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Encoding(#[from] base64::DecodeError),

    #[error("plaintext in a delta chain is not valid utf-8")]
    NotText(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Patch(#[from] DifferError),

    #[error(transparent)]
    Aead(#[from] AeadError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::ed25519::{SigningKey, VerifyingKey};
    use crate::delta::differ::diff;
    use crate::delta::record::{DELTA_SEPARATOR, DeltaRecord, count_deltas};

    use super::{DeltaError, compact, decrypt_chain, derive_file_key, encrypt_base, encrypt_delta};

    struct Fixture {
        rng: Rng,
        secret: [u8; 32],
        signing_key: SigningKey,
    }

    impl Fixture {
        fn new() -> Self {
            let rng = Rng::from_seed([1; 32]);
            let secret = rng.random_array().unwrap();
            let signing_key = SigningKey::generate(&rng).unwrap();
            Self {
                rng,
                secret,
                signing_key,
            }
        }

        fn epoch_secret(&self) -> impl Fn(u64) -> Option<[u8; 32]> + '_ {
            move |_| Some(self.secret)
        }

        fn author_key(&self) -> impl Fn(&str) -> Option<VerifyingKey> + '_ {
            let key = self.signing_key.verifying_key();
            move |author| (author == "alice").then_some(key)
        }
    }

    #[test]
    fn file_keys_differ_per_coordinate() {
        let fixture = Fixture::new();
        let other_secret: [u8; 32] = fixture.rng.random_array().unwrap();

        let base = derive_file_key(&fixture.secret, "a.txt", 0).unwrap();
        assert_eq!(base, derive_file_key(&fixture.secret, "a.txt", 0).unwrap());
        assert_ne!(base, derive_file_key(&fixture.secret, "b.txt", 0).unwrap());
        assert_ne!(base, derive_file_key(&fixture.secret, "a.txt", 1).unwrap());
        assert_ne!(base, derive_file_key(&other_secret, "a.txt", 0).unwrap());
    }

    #[test]
    fn base_block_roundtrip() {
        let fixture = Fixture::new();

        let chain = encrypt_base(
            b"hello\n",
            &fixture.secret,
            "a.txt",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();
        assert_eq!(count_deltas(&chain), 0);

        let record = DeltaRecord::from_b64(&chain).unwrap();
        assert_eq!(record.seq, 0);
        assert_eq!(record.prev_hash, "");
        assert_eq!(record.file_path, "a.txt");

        let plaintext =
            decrypt_chain(&chain, "a.txt", fixture.epoch_secret(), fixture.author_key()).unwrap();
        assert_eq!(plaintext, b"hello\n");
    }

    #[test]
    fn binary_base_block_roundtrip() {
        let fixture = Fixture::new();

        let payload: Vec<u8> = (0..=255).collect();
        let chain = encrypt_base(
            &payload,
            &fixture.secret,
            "blob.bin",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();

        let plaintext = decrypt_chain(
            &chain,
            "blob.bin",
            fixture.epoch_secret(),
            fixture.author_key(),
        )
        .unwrap();
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn delta_chain_roundtrip() {
        let fixture = Fixture::new();

        let v1 = "hello\n";
        let v2 = "hello world\n";
        let v3 = "hello world\ngoodbye\n";

        let chain = encrypt_base(
            v1.as_bytes(),
            &fixture.secret,
            "a.txt",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();
        let chain = encrypt_delta(
            &diff(v1, v2),
            &fixture.secret,
            "a.txt",
            0,
            1,
            "alice",
            &fixture.signing_key,
            &chain,
            &fixture.rng,
        )
        .unwrap();
        let chain = encrypt_delta(
            &diff(v2, v3),
            &fixture.secret,
            "a.txt",
            0,
            2,
            "alice",
            &fixture.signing_key,
            &chain,
            &fixture.rng,
        )
        .unwrap();
        assert_eq!(count_deltas(&chain), 2);

        let plaintext =
            decrypt_chain(&chain, "a.txt", fixture.epoch_secret(), fixture.author_key()).unwrap();
        assert_eq!(plaintext, v3.as_bytes());
    }

    #[test]
    fn tampered_record_fails() {
        let fixture = Fixture::new();

        let chain = encrypt_base(
            b"hello\n",
            &fixture.secret,
            "a.txt",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();

        // Re-encode the record with a flipped ciphertext byte; the signature no longer covers
        // it.
        let mut record = DeltaRecord::from_b64(&chain).unwrap();
        record.ct[0] ^= 1;
        let tampered = record.to_b64().unwrap();

        assert!(matches!(
            decrypt_chain(
                &tampered,
                "a.txt",
                fixture.epoch_secret(),
                fixture.author_key()
            ),
            Err(DeltaError::SignatureInvalid { index: 0, .. })
        ));
    }

    #[test]
    fn broken_hash_chain_fails() {
        let fixture = Fixture::new();

        let v1 = "hello\n";
        let v2 = "hello world\n";
        let chain = encrypt_base(
            v1.as_bytes(),
            &fixture.secret,
            "a.txt",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();
        let chain = encrypt_delta(
            &diff(v1, v2),
            &fixture.secret,
            "a.txt",
            0,
            1,
            "alice",
            &fixture.signing_key,
            &chain,
            &fixture.rng,
        )
        .unwrap();

        // Replace the base block with a validly signed but different record: the delta's
        // prev_hash no longer matches.
        let other_base = encrypt_base(
            b"imposter\n",
            &fixture.secret,
            "a.txt",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();
        let delta_block = chain.split(DELTA_SEPARATOR).nth(1).unwrap();
        let spliced = format!("{other_base}{DELTA_SEPARATOR}{delta_block}");

        assert!(matches!(
            decrypt_chain(
                &spliced,
                "a.txt",
                fixture.epoch_secret(),
                fixture.author_key()
            ),
            Err(DeltaError::ChainBroken { index: 1 })
        ));
    }

    #[test]
    fn unknown_author_and_missing_epoch() {
        let fixture = Fixture::new();

        let chain = encrypt_base(
            b"hello\n",
            &fixture.secret,
            "a.txt",
            7,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();

        assert!(matches!(
            decrypt_chain(&chain, "a.txt", fixture.epoch_secret(), |_| None),
            Err(DeltaError::UnknownAuthor { .. })
        ));
        assert!(matches!(
            decrypt_chain(&chain, "a.txt", |_| None, fixture.author_key()),
            Err(DeltaError::MissingEpochSecret { epoch: 7 })
        ));
    }

    #[test]
    fn compaction_flattens_chain() {
        let fixture = Fixture::new();

        let v1 = "one\n";
        let v2 = "one\ntwo\n";
        let chain = encrypt_base(
            v1.as_bytes(),
            &fixture.secret,
            "a.txt",
            0,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();
        let chain = encrypt_delta(
            &diff(v1, v2),
            &fixture.secret,
            "a.txt",
            0,
            1,
            "alice",
            &fixture.signing_key,
            &chain,
            &fixture.rng,
        )
        .unwrap();

        let new_secret: [u8; 32] = fixture.rng.random_array().unwrap();
        let compacted = compact(
            &chain,
            "a.txt",
            fixture.epoch_secret(),
            fixture.author_key(),
            &new_secret,
            1,
            "alice",
            &fixture.signing_key,
            &fixture.rng,
        )
        .unwrap();

        assert_eq!(count_deltas(&compacted), 0);
        let plaintext = decrypt_chain(
            &compacted,
            "a.txt",
            |_| Some(new_secret),
            fixture.author_key(),
        )
        .unwrap();
        assert_eq!(plaintext, v2.as_bytes());
    }
}
