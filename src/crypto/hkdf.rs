// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key derivation.
//!
//! Every key in the system comes out of HKDF-SHA256: epoch advances, exported epoch
//! secrets, per-file keys, encapsulation keys and the Welcome sealing key differ only in
//! their input material, salt and info label.
use hkdf::Hkdf;
use sha2::Sha256;

use crate::crypto::CryptoError;

/// Derives `N` bytes of key material from `ikm`.
///
/// An empty salt is treated as no salt at all, so persisted call sites cannot accidentally
/// distinguish the two.
pub fn derive<const N: usize>(
    ikm: &[u8],
    salt: &[u8],
    info: Option<&[u8]>,
) -> Result<[u8; N], CryptoError> {
    let salt = (!salt.is_empty()).then_some(salt);
    let mut okm = [0u8; N];
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info.unwrap_or_default(), &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::derive;

    #[test]
    fn derivation_is_a_function_of_every_input() {
        let base: [u8; 32] = derive(b"epoch secret", b"a.txt", Some(b"label")).unwrap();

        assert_eq!(
            base,
            derive(b"epoch secret", b"a.txt", Some(b"label")).unwrap()
        );
        assert_ne!(
            base,
            derive(b"other secret", b"a.txt", Some(b"label")).unwrap()
        );
        assert_ne!(
            base,
            derive(b"epoch secret", b"b.txt", Some(b"label")).unwrap()
        );
        assert_ne!(
            base,
            derive(b"epoch secret", b"a.txt", Some(b"other label")).unwrap()
        );
        assert_ne!(base, derive(b"epoch secret", b"a.txt", None).unwrap());
    }

    #[test]
    fn empty_salt_is_stable() {
        let first: [u8; 32] = derive(b"epoch secret", b"", Some(b"label")).unwrap();
        let second: [u8; 32] = derive(b"epoch secret", b"", Some(b"label")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn output_length_is_part_of_the_key() {
        let short: [u8; 16] = derive(b"epoch secret", b"", None).unwrap();
        let long: [u8; 32] = derive(b"epoch secret", b"", None).unwrap();
        assert_eq!(short, long[..16]);
    }

    #[test]
    fn oversized_output_is_rejected() {
        // HKDF-SHA256 tops out at 255 hash blocks.
        let result: Result<[u8; 8192], _> = derive(b"epoch secret", b"", None);
        assert!(result.is_err());
    }
}
