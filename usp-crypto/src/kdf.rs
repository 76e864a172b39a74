//! HKDF-SHA256 key derivation.
//!
//! `key = HKDF-SHA256(ikm, salt=None, info=info, len=32)`

use crate::error::CryptoError;
use hkdf::Hkdf;
use sha2::Sha256;

pub const DOMAIN_PREFIX: &[u8] = b"usp-kdf-v1|";

/// Derive a 32-byte key from `ikm`, domain-separated by `purpose` and bound
/// to `context`.
pub fn derive_key(ikm: &[u8], purpose: &[u8], context: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut info = Vec::with_capacity(DOMAIN_PREFIX.len() + purpose.len() + 1 + context.len());
    info.extend_from_slice(DOMAIN_PREFIX);
    info.extend_from_slice(purpose);
    info.push(b'|');
    info.extend_from_slice(context);

    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut out = [0u8; 32];
    hk.expand(&info, &mut out).map_err(|_| CryptoError)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = derive_key(b"ikm", b"kv", b"path/one").unwrap();
        let b = derive_key(b"ikm", b"kv", b"path/one").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_purpose() {
        let a = derive_key(b"ikm", b"kv", b"ctx").unwrap();
        let b = derive_key(b"ikm", b"transit", b"ctx").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn differs_by_context() {
        let a = derive_key(b"ikm", b"kv", b"ctx-a").unwrap();
        let b = derive_key(b"ikm", b"kv", b"ctx-b").unwrap();
        assert_ne!(a, b);
    }
}
