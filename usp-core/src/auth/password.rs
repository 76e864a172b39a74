//! Salted password hashing and constant-time verification, the same
//! salted-digest-plus-`ConstantTimeEq` idiom this codebase already uses for
//! API-key comparison, generalized to user passwords.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use usp_crypto::CryptoError;

pub const SALT_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    salt: [u8; SALT_BYTES],
    digest: [u8; 32],
}

impl PasswordHash {
    pub fn new(password: &str) -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_BYTES];
        usp_crypto::rand::fill(&mut salt)?;
        Ok(Self { salt, digest: digest_of(&salt, password) })
    }

    pub fn verify(&self, candidate: &str) -> bool {
        let candidate_digest = digest_of(&self.salt, candidate);
        self.digest.ct_eq(&candidate_digest).into()
    }
}

fn digest_of(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_correct_password() {
        let hash = PasswordHash::new("correct horse battery staple").unwrap();
        assert!(hash.verify("correct horse battery staple"));
    }

    #[test]
    fn rejects_wrong_password() {
        let hash = PasswordHash::new("correct horse battery staple").unwrap();
        assert!(!hash.verify("wrong password"));
    }

    #[test]
    fn same_password_hashes_differently_per_salt() {
        let a = PasswordHash::new("shared-password").unwrap();
        let b = PasswordHash::new("shared-password").unwrap();
        assert_ne!(a.digest, b.digest);
    }
}
