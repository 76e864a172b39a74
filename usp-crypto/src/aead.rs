//! AEAD: AES-256-GCM.

use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;

pub const NONCE_BYTES: usize = 12;
pub const TAG_BYTES: usize = 16;

/// Generate a random 12-byte nonce. Never reuse a nonce under the same key.
pub fn nonce() -> Result<[u8; NONCE_BYTES], CryptoError> {
    let mut n = [0u8; NONCE_BYTES];
    getrandom(&mut n).map_err(|_| CryptoError)?;
    Ok(n)
}

/// Seal `plaintext` under `key`/`nonce`, binding `aad`. Output is
/// `ciphertext || tag` as produced by the `aes-gcm` crate.
pub fn seal(key: &[u8; 32], nonce: &[u8; NONCE_BYTES], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError)?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: plaintext, aad };
    cipher.encrypt(n, payload).map_err(|_| CryptoError)
}

/// Open a `ciphertext || tag` blob under `key`/`nonce`, checking `aad`.
pub fn open(key: &[u8; 32], nonce: &[u8; NONCE_BYTES], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError)?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: ciphertext, aad };
    cipher.decrypt(n, payload).map_err(|_| CryptoError)
}
