// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base64 helpers for the two alphabets used on disk.
//!
//! Delta records and archive entries use the URL-safe alphabet without padding, persisted
//! state blobs use the standard alphabet with padding.
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::{DecodeError, Engine};

/// Encodes data with the URL-safe alphabet, without padding.
pub fn encode_url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes URL-safe base64. Padding is tolerated on input.
pub fn decode_url(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))
}

/// Encodes data with the standard alphabet, with padding.
pub fn encode_std(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes standard base64.
pub fn decode_std(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(encoded)
}

/// Serde adapter serializing byte fields as standard base64 strings.
pub mod serde_std {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::encode_std(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::decode_std(&encoded).map_err(D::Error::custom)
    }
}

/// Serde adapter serializing byte fields as URL-safe unpadded base64 strings.
pub mod serde_url {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::encode_url(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::decode_url(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_std, decode_url, encode_std, encode_url};

    #[test]
    fn url_safe_has_no_padding() {
        let encoded = encode_url(&[251, 255, 190]);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode_url(&encoded).unwrap(), vec![251, 255, 190]);
    }

    #[test]
    fn url_safe_tolerates_padding() {
        assert_eq!(decode_url("aGk=").unwrap(), b"hi");
        assert_eq!(decode_url("aGk").unwrap(), b"hi");
    }

    #[test]
    fn standard_roundtrip() {
        let data = b"standard alphabet, with padding".to_vec();
        assert_eq!(decode_std(&encode_std(&data)).unwrap(), data);
    }

    #[test]
    fn alphabets_are_distinct() {
        assert!(decode_std("_-_-").is_err());
    }
}
