//! CSPRNG helpers shared across the platform: nonces, tokens, passwords.

use crate::error::CryptoError;

/// Fill `buf` with CSPRNG bytes.
pub fn fill(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError)
}

/// A random 32-byte value, e.g. a master key or a symmetric data key.
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    let mut out = [0u8; 32];
    fill(&mut out)?;
    Ok(out)
}

/// A random 64-byte refresh token, base64url-encoded per the auth session
/// contract.
pub fn random_refresh_token() -> Result<String, CryptoError> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let mut bytes = [0u8; 64];
    fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// A password satisfying a minimal complexity policy: at least one of each
/// class (lower, upper, digit, symbol) and the requested length.
pub fn random_password(length: usize) -> Result<String, CryptoError> {
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const DIGIT: &[u8] = b"23456789";
    const SYMBOL: &[u8] = b"!@#$%^&*-_=+";
    let classes = [LOWER, UPPER, DIGIT, SYMBOL];

    let length = length.max(classes.len());
    let mut indices = vec![0u8; length];
    fill(&mut indices)?;

    let mut password: Vec<u8> = Vec::with_capacity(length);
    for (i, idx) in indices.iter().enumerate() {
        let class = classes[i % classes.len()];
        password.push(class[*idx as usize % class.len()]);
    }

    // Fisher-Yates shuffle so the guaranteed classes aren't positionally fixed.
    let mut shuffle_bytes = vec![0u8; length];
    fill(&mut shuffle_bytes)?;
    for i in (1..length).rev() {
        let j = shuffle_bytes[i] as usize % (i + 1);
        password.swap(i, j);
    }

    Ok(String::from_utf8(password).expect("ascii only"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_32_is_not_all_zero() {
        let a = random_32().unwrap();
        assert_ne!(a, [0u8; 32]);
    }

    #[test]
    fn refresh_tokens_are_unique() {
        let a = random_refresh_token().unwrap();
        let b = random_refresh_token().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn password_meets_requested_length() {
        let p = random_password(16).unwrap();
        assert_eq!(p.len(), 16);
    }
}
