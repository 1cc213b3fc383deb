// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoError, Rng, ed25519, encoding, x25519};

/// Key material a member holds for group operations: an Ed25519 leaf signing key and an X25519
/// init key used for Welcome decryption and update-secret decapsulation.
#[derive(Clone, Debug)]
pub struct MemberKeys {
    pub signing: ed25519::SigningKey,
    pub init: x25519::SecretKey,
}

impl MemberKeys {
    pub fn generate(rng: &Rng) -> Result<Self, CryptoError> {
        Ok(Self {
            signing: ed25519::SigningKey::generate(rng)?,
            init: x25519::SecretKey::generate(rng)?,
        })
    }

    /// Builds the public key package handed to an adder.
    pub fn key_package(&self, identity: impl Into<Vec<u8>>) -> KeyPackage {
        KeyPackage {
            identity: identity.into(),
            sig_pub: self.signing.verifying_key(),
            init_pub: self.init.public_key(),
        }
    }
}

/// Public keys a joiner publishes so an existing member can add them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackage {
    #[serde(with = "encoding::serde_std")]
    pub identity: Vec<u8>,
    pub sig_pub: ed25519::VerifyingKey,
    pub init_pub: x25519::PublicKey,
}

/// One leaf of the members sequence. Positions are never reused; removed members stay in place
/// marked inactive so leaf indices remain stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub sig_pub: ed25519::VerifyingKey,
    pub init_pub: x25519::PublicKey,
    pub active: bool,
}
