//! Shamir secret sharing of a 32-byte master key over GF(2^8).
//!
//! One polynomial of degree `threshold - 1` per byte position, independent
//! random coefficients, x-coordinates `1..=n`. Reconstruction is Lagrange
//! interpolation at x=0, done independently per byte.

use crate::error::CryptoError;
use crate::gf256;
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SECRET_BYTES: usize = 32;

/// One point on the sharing polynomial: `x` plus the 32 y-values (one per
/// byte position of the secret). Wire form per the platform's external
/// interface contract is `x || y` (33 bytes).
#[derive(Clone, ZeroizeOnDrop)]
pub struct Share {
    pub x: u8,
    pub y: [u8; SECRET_BYTES],
}

impl Share {
    pub fn to_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = self.x;
        out[1..].copy_from_slice(&self.y);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 33 {
            return Err(CryptoError);
        }
        if bytes[0] == 0 {
            return Err(CryptoError);
        }
        let mut y = [0u8; SECRET_BYTES];
        y.copy_from_slice(&bytes[1..]);
        Ok(Share { x: bytes[0], y })
    }
}

/// Split `secret` into `n` shares such that any `threshold` of them
/// reconstruct it and any `threshold - 1` reveal nothing.
///
/// `1 <= threshold <= n <= 255`.
pub fn split(secret: &[u8; SECRET_BYTES], n: u8, threshold: u8) -> Result<Vec<Share>, CryptoError> {
    if threshold == 0 || threshold > n {
        return Err(CryptoError);
    }

    let degree = (threshold - 1) as usize;
    // coefficients[byte_pos][0] = secret byte, coefficients[byte_pos][1..=degree] = random
    let mut coefficients = vec![[0u8; SECRET_BYTES]; degree + 1];
    for (i, &b) in secret.iter().enumerate() {
        coefficients[0][i] = b;
    }
    let mut rng = OsRng;
    for coeff in coefficients.iter_mut().skip(1) {
        rng.fill_bytes(coeff);
    }

    let mut shares = Vec::with_capacity(n as usize);
    for x in 1..=n {
        let mut y = [0u8; SECRET_BYTES];
        for byte_pos in 0..SECRET_BYTES {
            y[byte_pos] = eval_polynomial(&coefficients, byte_pos, x);
        }
        shares.push(Share { x, y });
    }

    for coeff in coefficients.iter_mut() {
        coeff.zeroize();
    }

    Ok(shares)
}

fn eval_polynomial(coefficients: &[[u8; SECRET_BYTES]], byte_pos: usize, x: u8) -> u8 {
    // Horner's method: evaluate sum(c_i * x^i) in GF(2^8).
    let mut result = 0u8;
    for coeff in coefficients.iter().rev() {
        result = gf256::add(gf256::mul(result, x), coeff[byte_pos]);
    }
    result
}

/// Reconstruct the secret from `threshold`-or-more shares via Lagrange
/// interpolation at x=0. Shares with duplicate x-coordinates are
/// deduplicated (first occurrence wins) before interpolating.
pub fn combine(shares: &[Share]) -> Result<[u8; SECRET_BYTES], CryptoError> {
    if shares.is_empty() {
        return Err(CryptoError);
    }

    let mut seen = Vec::new();
    let mut unique: Vec<&Share> = Vec::new();
    for share in shares {
        if !seen.contains(&share.x) {
            seen.push(share.x);
            unique.push(share);
        }
    }

    let mut secret = [0u8; SECRET_BYTES];
    for byte_pos in 0..SECRET_BYTES {
        secret[byte_pos] = lagrange_at_zero(&unique, byte_pos);
    }
    Ok(secret)
}

fn lagrange_at_zero(shares: &[&Share], byte_pos: usize) -> u8 {
    let mut result = 0u8;
    for (i, share_i) in shares.iter().enumerate() {
        let mut basis = 1u8;
        for (j, share_j) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            // Evaluating at x=0: numerator term is (0 - x_j) = x_j in GF(2^8)
            // (subtraction is XOR, so -x_j == x_j), denominator is (x_i - x_j).
            let numerator = share_j.x;
            let denominator = gf256::add(share_i.x, share_j.x);
            basis = gf256::mul(basis, gf256::div(numerator, denominator));
        }
        result = gf256::add(result, gf256::mul(share_i.y[byte_pos], basis));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_combine_roundtrip_at_threshold() {
        let secret = *b"0123456789abcdef0123456789abcdef";
        let secret: [u8; 32] = secret[..32].try_into().unwrap();
        let shares = split(&secret, 5, 3).unwrap();
        let reconstructed = combine(&shares[0..3]).unwrap();
        assert_eq!(reconstructed, secret);
    }

    #[test]
    fn any_threshold_subset_reconstructs() {
        let secret = [7u8; 32];
        let shares = split(&secret, 5, 3).unwrap();
        for combo in [
            vec![shares[0].clone(), shares[1].clone(), shares[2].clone()],
            vec![shares[1].clone(), shares[3].clone(), shares[4].clone()],
            vec![shares[0].clone(), shares[2].clone(), shares[4].clone()],
        ] {
            assert_eq!(combine(&combo).unwrap(), secret);
        }
    }

    #[test]
    fn below_threshold_does_not_reliably_reconstruct() {
        let secret = [42u8; 32];
        let shares = split(&secret, 5, 3).unwrap();
        let reconstructed = combine(&shares[0..2]).unwrap();
        assert_ne!(reconstructed, secret);
    }

    #[test]
    fn rejects_invalid_threshold() {
        let secret = [1u8; 32];
        assert!(split(&secret, 3, 4).is_err());
        assert!(split(&secret, 5, 0).is_err());
    }

    #[test]
    fn share_wire_roundtrip() {
        let secret = [9u8; 32];
        let shares = split(&secret, 3, 2).unwrap();
        for share in &shares {
            let bytes = share.to_bytes();
            assert_eq!(bytes.len(), 33);
            let parsed = Share::from_bytes(&bytes).unwrap();
            assert_eq!(parsed.x, share.x);
            assert_eq!(parsed.y, share.y);
        }
    }
}
