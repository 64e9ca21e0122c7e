//! HKDF key derivation (RFC 5869, HMAC-SHA-256)

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoError, Result};

/// RFC 5869 caps the output at 255 hash blocks.
pub const MAX_OUTPUT_LEN: usize = 255 * 32;

/// Extract a pseudorandom key from input keying material.
///
/// A missing salt defaults to the RFC 5869 zero salt, which under HMAC key
/// padding is equivalent to a zero-filled HMAC block.
pub fn extract(salt: Option<&[u8]>, ikm: &[u8]) -> [u8; 32] {
    let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
    prk.into()
}

/// Expand a pseudorandom key to `len` output bytes.
pub fn expand(prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    check_len(len)?;
    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|_| CryptoError::InvalidInput("pseudorandom key too short".into()))?;
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidInput("requested output length too long".into()))?;
    Ok(okm)
}

/// Combined extract-and-expand.
pub fn derive(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], len: usize) -> Result<Vec<u8>> {
    check_len(len)?;
    if ikm.is_empty() {
        return Err(CryptoError::InvalidInput(
            "input keying material must not be empty".into(),
        ));
    }
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidInput("requested output length too long".into()))?;
    Ok(okm)
}

fn check_len(len: usize) -> Result<()> {
    if len == 0 {
        return Err(CryptoError::InvalidInput(
            "output length must be at least 1".into(),
        ));
    }
    if len > MAX_OUTPUT_LEN {
        return Err(CryptoError::InvalidInput(format!(
            "output length {len} exceeds the HKDF limit of {MAX_OUTPUT_LEN}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc5869_case_1() {
        // RFC 5869, appendix A.1
        let ikm = [0x0bu8; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = derive(&ikm, Some(&salt), &info, 42).unwrap();
        assert_eq!(
            hex::encode(&okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn extract_then_expand_matches_derive() {
        let ikm = b"a master key that is long enough";
        let info = b"codeops-vault-test";

        let prk = extract(None, ikm);
        let okm = expand(&prk, info, 32).unwrap();
        assert_eq!(okm, derive(ikm, None, info, 32).unwrap());
    }

    #[test]
    fn zero_salt_equals_no_salt() {
        // RFC 5869: absent salt means a zero-filled salt.
        let ikm = b"input keying material";
        let zeros = [0u8; 32];
        assert_eq!(
            derive(ikm, None, b"info", 32).unwrap(),
            derive(ikm, Some(&zeros), b"info", 32).unwrap()
        );
    }

    #[test]
    fn extract_is_hmac_of_the_ikm() {
        // RFC 5869: PRK = HMAC-Hash(salt, IKM).
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let salt = b"some salt";
        let ikm = b"input keying material";

        let mut mac = Hmac::<Sha256>::new_from_slice(salt).unwrap();
        mac.update(ikm);
        let expected = mac.finalize().into_bytes();

        assert_eq!(extract(Some(salt), ikm).as_slice(), expected.as_slice());
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        let ikm = b"ikm";
        assert!(matches!(
            derive(ikm, None, b"", 0),
            Err(CryptoError::InvalidInput(_))
        ));
        assert!(matches!(
            derive(ikm, None, b"", MAX_OUTPUT_LEN + 1),
            Err(CryptoError::InvalidInput(_))
        ));
        assert_eq!(derive(ikm, None, b"", MAX_OUTPUT_LEN).unwrap().len(), MAX_OUTPUT_LEN);
    }
}
