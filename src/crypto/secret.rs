// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(not(test))]
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::crypto::encoding;

/// Generic container for sensitive bytes with best-effort security measures.
///
/// In particular this implementation provides:
/// 1. Zeroise memory on drop.
/// 2. Hide bytes value when printing debug info.
/// 3. Constant-time comparison implementation to prevent timing attacks.
///
/// Serialization goes through standard base64 strings since all persisted
/// state blobs holding secrets are JSON.
#[derive(Clone, Eq, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Debug))]
pub struct Secret<const N: usize>([u8; N]);

impl<const N: usize> Secret<N> {
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison.
        bool::from(self.0.ct_eq(&other.0))
    }
}

#[cfg(not(test))]
impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.debug_struct("Secret").field("value", &"***").finish()
    }
}

impl<const N: usize> Serialize for Secret<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encoding::encode_std(&self.0))
    }
}

impl<'de, const N: usize> Deserialize<'de> for Secret<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = encoding::decode_std(&encoded).map_err(D::Error::custom)?;
        let bytes: [u8; N] = bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {} secret bytes", N)))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::Secret;

    #[test]
    fn serde_roundtrip() {
        let secret = Secret::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&secret).unwrap();
        let again: Secret<32> = serde_json::from_str(&json).unwrap();
        assert_eq!(secret, again);
    }

    #[test]
    fn wrong_length_rejected() {
        let secret = Secret::from_bytes([7u8; 16]);
        let json = serde_json::to_string(&secret).unwrap();
        let result: Result<Secret<32>, _> = serde_json::from_str(&json);
        assert!(result.is_err());
    }
}
