//! Shamir secret sharing over GF(2^8)
//!
//! Splits a byte string into `n` shares such that any `k` reconstruct it.
//! Each byte is shared independently: a random degree-(k-1) polynomial with
//! the byte as its constant term is sampled, and share `i` carries the point
//! `(i, poly(i))` for every byte. A share's wire form is the 1-based share
//! index followed by one evaluation byte per secret byte; the transport
//! representation is base64 of that sequence.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Maximum number of shares; share indices are single bytes.
pub const MAX_SHARES: u8 = 255;

/// GF(2^8) log/exp tables, reduction polynomial 0x11B, generator 0x03.
///
/// `exp` is doubled so `exp[log[a] + log[b]]` never needs a modulo.
static TABLES: Lazy<([u8; 512], [u8; 256])> = Lazy::new(|| {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u8 = 1;
    for i in 0..255 {
        exp[i] = x;
        log[x as usize] = i as u8;
        x = xtime(x) ^ x; // multiply by the generator 0x03
    }
    for i in 255..510 {
        exp[i] = exp[i - 255];
    }
    (exp, log)
});

#[inline]
fn xtime(a: u8) -> u8 {
    (a << 1) ^ (if a & 0x80 != 0 { 0x1B } else { 0 })
}

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let (exp, log) = (&TABLES.0, &TABLES.1);
    exp[log[a as usize] as usize + log[b as usize] as usize]
}

#[inline]
fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert_ne!(b, 0, "division by zero in GF(2^8)");
    if a == 0 {
        return 0;
    }
    let (exp, log) = (&TABLES.0, &TABLES.1);
    exp[255 + log[a as usize] as usize - log[b as usize] as usize]
}

/// Evaluate a polynomial (coefficients low-to-high) at `x` via Horner.
fn eval_poly(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ c;
    }
    acc
}

/// Split `secret` into `n` shares with reconstruction threshold `k`.
///
/// Each returned share is `[index] ∥ evaluation bytes` with a 1-based index.
pub fn split(secret: &[u8], n: u8, k: u8) -> Result<Vec<Vec<u8>>> {
    if secret.is_empty() {
        return Err(CryptoError::InvalidInput("secret must not be empty".into()));
    }
    if k == 0 || k > n {
        return Err(CryptoError::InvalidInput(format!(
            "threshold {k} must lie in 1..={n}"
        )));
    }

    let mut shares: Vec<Vec<u8>> = (1..=n)
        .map(|i| {
            let mut share = Vec::with_capacity(secret.len() + 1);
            share.push(i);
            share
        })
        .collect();

    let mut coeffs = Zeroizing::new(vec![0u8; k as usize]);
    for &byte in secret {
        coeffs[0] = byte;
        if k > 1 {
            OsRng.fill_bytes(&mut coeffs[1..]);
        }
        for share in shares.iter_mut() {
            let x = share[0];
            share.push(eval_poly(&coeffs, x));
        }
    }

    Ok(shares)
}

/// Reconstruct a secret from index-prefixed shares via Lagrange
/// interpolation at x = 0.
///
/// Any `k` of the original shares yield the original secret; fewer, or
/// shares from different splits, yield garbage (callers verify the result
/// against a known digest or key).
pub fn combine(shares: &[Vec<u8>]) -> Result<Vec<u8>> {
    if shares.is_empty() {
        return Err(CryptoError::InvalidInput("no shares provided".into()));
    }
    let len = shares[0].len();
    if len < 2 {
        return Err(CryptoError::InvalidInput("share too short".into()));
    }

    let mut xs = Vec::with_capacity(shares.len());
    for share in shares {
        if share.len() != len {
            return Err(CryptoError::InvalidInput(
                "shares have mismatched lengths".into(),
            ));
        }
        let x = share[0];
        if x == 0 {
            return Err(CryptoError::InvalidInput("share index must be nonzero".into()));
        }
        if xs.contains(&x) {
            return Err(CryptoError::InvalidInput(format!(
                "duplicate share index {x}"
            )));
        }
        xs.push(x);
    }

    // Lagrange basis at x = 0: basis_i = Π_{m≠i} x_m / (x_m ⊕ x_i).
    let mut basis = Vec::with_capacity(xs.len());
    for (i, &xi) in xs.iter().enumerate() {
        let mut b = 1u8;
        for (m, &xm) in xs.iter().enumerate() {
            if m != i {
                b = gf_mul(b, gf_div(xm, xm ^ xi));
            }
        }
        basis.push(b);
    }

    let mut secret = vec![0u8; len - 1];
    for (slot, byte) in secret.iter_mut().enumerate() {
        let mut acc = 0u8;
        for (i, share) in shares.iter().enumerate() {
            acc ^= gf_mul(share[slot + 1], basis[i]);
        }
        *byte = acc;
    }

    Ok(secret)
}

/// Encode an index-prefixed share for transport.
pub fn encode_share(share: &[u8]) -> String {
    BASE64.encode(share)
}

/// Decode a transported share back to its index-prefixed byte form.
pub fn decode_share(encoded: &str) -> Result<Vec<u8>> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::InvalidInput("share is not valid base64".into()))?;
    if bytes.len() < 2 {
        return Err(CryptoError::InvalidInput("share too short".into()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_tables_are_consistent() {
        // a * b / b == a for all nonzero b
        for a in 1..=255u8 {
            assert_eq!(gf_div(gf_mul(a, 0x53), 0x53), a);
        }
        // multiplication against a slow reference for a sample of pairs
        fn slow_mul(mut a: u8, mut b: u8) -> u8 {
            let mut p = 0u8;
            while b != 0 {
                if b & 1 != 0 {
                    p ^= a;
                }
                a = xtime(a);
                b >>= 1;
            }
            p
        }
        for a in [0u8, 1, 2, 3, 0x53, 0x80, 0xCA, 0xFF] {
            for b in [0u8, 1, 2, 3, 0x53, 0x80, 0xCA, 0xFF] {
                assert_eq!(gf_mul(a, b), slow_mul(a, b), "mul {a:#x} {b:#x}");
            }
        }
    }

    #[test]
    fn split_and_combine_roundtrip() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let shares = split(secret, 5, 3).unwrap();
        assert_eq!(shares.len(), 5);
        for share in &shares {
            assert_eq!(share.len(), secret.len() + 1);
        }

        let picked = vec![shares[4].clone(), shares[0].clone(), shares[2].clone()];
        assert_eq!(combine(&picked).unwrap(), secret);
    }

    #[test]
    fn every_threshold_subset_reconstructs() {
        let secret = b"sixteen byte key";
        let shares = split(secret, 5, 3).unwrap();

        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let subset = vec![shares[a].clone(), shares[b].clone(), shares[c].clone()];
                    assert_eq!(combine(&subset).unwrap(), secret, "subset {a}{b}{c}");
                }
            }
        }
    }

    #[test]
    fn below_threshold_does_not_reconstruct() {
        let secret = b"another secret value here padded";
        let shares = split(secret, 5, 3).unwrap();
        let two = vec![shares[0].clone(), shares[1].clone()];
        // combine succeeds mechanically but must not produce the secret
        assert_ne!(combine(&two).unwrap(), secret);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(split(b"", 3, 2).is_err());
        assert!(split(b"x", 3, 0).is_err());
        assert!(split(b"x", 2, 3).is_err());

        let shares = split(b"abc", 3, 2).unwrap();
        let dup = vec![shares[0].clone(), shares[0].clone()];
        assert!(combine(&dup).is_err());
        assert!(combine(&[]).is_err());
    }

    #[test]
    fn transport_encoding_roundtrip() {
        let shares = split(b"secret", 3, 2).unwrap();
        for share in &shares {
            let encoded = encode_share(share);
            assert_eq!(&decode_share(&encoded).unwrap(), share);
        }
        assert!(decode_share("not-base64!!!").is_err());
    }
}
