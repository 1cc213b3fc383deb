// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elliptic-curve Diffie–Hellman (ECDH) key agreement scheme (X25519).
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::encoding;
use crate::crypto::{CryptoError, Rng};

pub const SECRET_KEY_SIZE: usize = 32;

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const AGREEMENT_SIZE: usize = 32;

/// X25519 secret key. Clamping per RFC 7748 is applied by the scalar multiplication.
#[derive(Clone)]
pub struct SecretKey(x25519_dalek::StaticSecret);

impl SecretKey {
    pub fn generate(rng: &Rng) -> Result<Self, CryptoError> {
        Ok(Self::from_bytes(rng.random_array()?))
    }

    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Scalar multiplication with the curve basepoint.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    pub fn calculate_agreement(&self, their_public: &PublicKey) -> [u8; AGREEMENT_SIZE] {
        *self.0.diffie_hellman(&their_public.0).as_bytes()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.debug_struct("SecretKey").field("value", &"***").finish()
    }
}

/// X25519 public key, serialized as a standard base64 string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encoding::encode_std(self.as_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = encoding::decode_std(&encoded).map_err(D::Error::custom)?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 x25519 public key bytes"))?;
        Ok(Self::from_bytes(bytes))
    }
}
