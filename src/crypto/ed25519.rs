// SPDX-License-Identifier: MIT OR Apache-2.0

//! Edwards-Curve Digital Signature Algorithm (EdDSA) over Curve25519.
//!
//! Private keys persist as PKCS8 PEM (optionally passphrase-encrypted), public keys as
//! SubjectPublicKeyInfo PEM. The raw 32-byte forms travel inside group state blobs as standard
//! base64 strings.
use std::fmt;

use ed25519_dalek::{Signer as _, Verifier as _};
use pkcs8::spki::{DecodePublicKey, EncodePublicKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::crypto::encoding;
use crate::crypto::sha2::sha2_256;
use crate::crypto::{CryptoError, Rng};

pub const SIGNING_KEY_SIZE: usize = 32;

pub const VERIFYING_KEY_SIZE: usize = 32;

pub const SIGNATURE_SIZE: usize = 64;

/// Length of the hex public-key fingerprint.
const FINGERPRINT_LEN: usize = 16;

#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    pub fn generate(rng: &Rng) -> Result<Self, CryptoError> {
        Ok(Self::from_seed(rng.random_array()?))
    }

    pub fn from_seed(seed: [u8; SIGNING_KEY_SIZE]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&seed))
    }

    pub fn seed(&self) -> [u8; SIGNING_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        Signature(self.0.sign(bytes).to_bytes())
    }

    /// Serializes to PKCS8 PEM, encrypted under the passphrase when one is given.
    pub fn to_pkcs8_pem(&self, passphrase: Option<&str>) -> Result<String, Ed25519Error> {
        let pem = match passphrase {
            Some(passphrase) => self.0.to_pkcs8_encrypted_pem(
                rand_core::OsRng,
                passphrase.as_bytes(),
                LineEnding::LF,
            )?,
            None => self.0.to_pkcs8_pem(LineEnding::LF)?,
        };
        Ok(pem.to_string())
    }

    /// Parses a PKCS8 PEM private key, decrypting it when the block is encrypted.
    pub fn from_pkcs8_pem(pem: &str, passphrase: Option<&str>) -> Result<Self, Ed25519Error> {
        if pem.contains("ENCRYPTED PRIVATE KEY") {
            let passphrase = passphrase.ok_or(Ed25519Error::MissingPassphrase)?;
            let key =
                ed25519_dalek::SigningKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())?;
            Ok(Self(key))
        } else {
            Ok(Self(ed25519_dalek::SigningKey::from_pkcs8_pem(pem)?))
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.debug_struct("SigningKey").field("value", &"***").finish()
    }
}

/// Ed25519 public key, serialized as a standard base64 string in state blobs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

impl VerifyingKey {
    pub fn from_bytes(bytes: [u8; VERIFYING_KEY_SIZE]) -> Result<Self, Ed25519Error> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| Ed25519Error::InvalidPublicKey)?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_bytes(self) -> [u8; VERIFYING_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), Ed25519Error> {
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0
            .verify(bytes, &signature)
            .map_err(|_| Ed25519Error::VerificationFailed)
    }

    /// Serializes to SubjectPublicKeyInfo PEM.
    pub fn to_public_key_pem(&self) -> Result<String, Ed25519Error> {
        Ok(EncodePublicKey::to_public_key_pem(&self.0, LineEnding::LF)?)
    }

    pub fn from_public_key_pem(pem: &str) -> Result<Self, Ed25519Error> {
        Ok(Self(ed25519_dalek::VerifyingKey::from_public_key_pem(
            pem,
        )?))
    }

    /// Short hex fingerprint over the SPKI PEM encoding.
    pub fn fingerprint(&self) -> Result<String, Ed25519Error> {
        let pem = self.to_public_key_pem()?;
        let digest = hex::encode(sha2_256(&[pem.as_bytes()]));
        Ok(digest[..FINGERPRINT_LEN].to_string())
    }
}

impl Serialize for VerifyingKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encoding::encode_std(self.as_bytes()))
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = encoding::decode_std(&encoded).map_err(D::Error::custom)?;
        let bytes: [u8; VERIFYING_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 ed25519 public key bytes"))?;
        Self::from_bytes(bytes).map_err(D::Error::custom)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("signature does not match public key and payload")]
    VerificationFailed,

    #[error("invalid ed25519 public key bytes")]
    InvalidPublicKey,

    #[error("private key is encrypted but no passphrase was supplied")]
    MissingPassphrase,

    #[error(transparent)]
    Pkcs8(#[from] pkcs8::Error),

    #[error(transparent)]
    Spki(#[from] pkcs8::spki::Error),
}
