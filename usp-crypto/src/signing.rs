//! Asymmetric signing (RSA, ECDSA P-256, Ed25519) and HMAC, plus the key
//! types the transit engine persists.
//!
//! Hash algorithm allowlist is exactly `{sha2-256, sha2-512}`; anything else
//! is an [`UnsupportedAlgorithm`] at this layer, surfaced by the caller as
//! `NotSupported`.

use crate::envelope::WireAlg;
use crate::error::{CryptoError, UnsupportedAlgorithm};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use p256::ecdsa::{signature::Signer as EcdsaSigner, signature::Verifier as EcdsaVerifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use rand_core::OsRng;
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::signature::{SignatureEncoding, Signer as RsaSigner, Verifier as RsaVerifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

/// Which asymmetric family a transit key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsymmetricAlgorithm {
    Rsa2048,
    Rsa4096,
    EcdsaP256,
    Ed25519,
}

/// Generated keypair, PKCS#8/raw-encoded for storage. The secret half is
/// always wrapped by the caller under the master/transit key before
/// persisting; this type never implements `Serialize`.
pub struct AsymmetricKeypair {
    pub algorithm: AsymmetricAlgorithm,
    pub secret_der: Zeroizing<Vec<u8>>,
    pub public_der: Vec<u8>,
}

pub fn generate_keypair(algorithm: AsymmetricAlgorithm) -> Result<AsymmetricKeypair, CryptoError> {
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};

    match algorithm {
        AsymmetricAlgorithm::Rsa2048 | AsymmetricAlgorithm::Rsa4096 => {
            let bits = if algorithm == AsymmetricAlgorithm::Rsa2048 { 2048 } else { 4096 };
            let mut rng = OsRng;
            let sk = RsaPrivateKey::new(&mut rng, bits).map_err(|_| CryptoError)?;
            let pk = RsaPublicKey::from(&sk);
            let secret_der = Zeroizing::new(sk.to_pkcs1_der().map_err(|_| CryptoError)?.as_bytes().to_vec());
            let public_der = pk.to_pkcs1_der().map_err(|_| CryptoError)?.into_vec();
            Ok(AsymmetricKeypair { algorithm, secret_der, public_der })
        }
        AsymmetricAlgorithm::EcdsaP256 => {
            let sk = P256SigningKey::random(&mut OsRng);
            let pk = P256VerifyingKey::from(&sk);
            Ok(AsymmetricKeypair {
                algorithm,
                secret_der: Zeroizing::new(sk.to_bytes().to_vec()),
                public_der: pk.to_encoded_point(false).as_bytes().to_vec(),
            })
        }
        AsymmetricAlgorithm::Ed25519 => {
            let sk = SigningKey::generate(&mut OsRng);
            Ok(AsymmetricKeypair {
                algorithm,
                secret_der: Zeroizing::new(sk.to_bytes().to_vec()),
                public_der: sk.verifying_key().to_bytes().to_vec(),
            })
        }
    }
}

/// Sign `input`'s hash under `hash_alg`, returning raw signature bytes
/// (PKCS#1 v1.5 for RSA, DER for ECDSA, raw 64 bytes for Ed25519).
pub fn sign(
    algorithm: AsymmetricAlgorithm,
    secret_der: &[u8],
    input: &[u8],
    hash_alg: WireAlg,
) -> Result<Vec<u8>, CryptoError> {
    use rsa::pkcs1::DecodeRsaPrivateKey;

    match algorithm {
        AsymmetricAlgorithm::Rsa2048 | AsymmetricAlgorithm::Rsa4096 => {
            let sk = RsaPrivateKey::from_pkcs1_der(secret_der).map_err(|_| CryptoError)?;
            let sig: RsaSignature = match hash_alg {
                WireAlg::Sha2_256 => RsaSigningKey::<Sha256>::new(sk).sign(input),
                WireAlg::Sha2_512 => RsaSigningKey::<Sha512>::new(sk).sign(input),
            };
            Ok(sig.to_vec())
        }
        AsymmetricAlgorithm::EcdsaP256 => {
            let sk = P256SigningKey::from_slice(secret_der).map_err(|_| CryptoError)?;
            let sig: P256Signature = match hash_alg {
                WireAlg::Sha2_256 => EcdsaSigner::<P256Signature>::sign(&sk, input),
                WireAlg::Sha2_512 => return Err(CryptoError),
            };
            Ok(sig.to_der().as_bytes().to_vec())
        }
        AsymmetricAlgorithm::Ed25519 => {
            let bytes: [u8; 32] = secret_der.try_into().map_err(|_| CryptoError)?;
            let sk = SigningKey::from_bytes(&bytes);
            let sig = sk.sign(input);
            Ok(sig.to_bytes().to_vec())
        }
    }
}

/// Verify a signature produced by [`sign`].
pub fn verify(
    algorithm: AsymmetricAlgorithm,
    public_der: &[u8],
    input: &[u8],
    hash_alg: WireAlg,
    signature: &[u8],
) -> Result<bool, CryptoError> {
    use rsa::pkcs1::DecodeRsaPublicKey;

    let ok = match algorithm {
        AsymmetricAlgorithm::Rsa2048 | AsymmetricAlgorithm::Rsa4096 => {
            let pk = RsaPublicKey::from_pkcs1_der(public_der).map_err(|_| CryptoError)?;
            let sig = RsaSignature::try_from(signature).map_err(|_| CryptoError)?;
            match hash_alg {
                WireAlg::Sha2_256 => RsaVerifyingKey::<Sha256>::new(pk).verify(input, &sig).is_ok(),
                WireAlg::Sha2_512 => RsaVerifyingKey::<Sha512>::new(pk).verify(input, &sig).is_ok(),
            }
        }
        AsymmetricAlgorithm::EcdsaP256 => {
            if hash_alg != WireAlg::Sha2_256 {
                return Err(CryptoError);
            }
            let pk = P256VerifyingKey::from_sec1_bytes(public_der).map_err(|_| CryptoError)?;
            let sig = P256Signature::from_der(signature).map_err(|_| CryptoError)?;
            EcdsaVerifier::<P256Signature>::verify(&pk, input, &sig).is_ok()
        }
        AsymmetricAlgorithm::Ed25519 => {
            let bytes: [u8; 32] = public_der.try_into().map_err(|_| CryptoError)?;
            let pk = VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError)?;
            let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| CryptoError)?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            pk.verify(input, &sig).is_ok()
        }
    };
    Ok(ok)
}

/// HMAC-SHA256/512 over `input` with `key`.
pub fn hmac(key: &[u8], input: &[u8], hash_alg: WireAlg) -> Result<Vec<u8>, UnsupportedAlgorithm> {
    match hash_alg {
        WireAlg::Sha2_256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| UnsupportedAlgorithm("sha2-256"))?;
            mac.update(input);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        WireAlg::Sha2_512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(|_| UnsupportedAlgorithm("sha2-512"))?;
            mac.update(input);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_verify_roundtrip() {
        let kp = generate_keypair(AsymmetricAlgorithm::Ed25519).unwrap();
        let sig = sign(AsymmetricAlgorithm::Ed25519, &kp.secret_der, b"message", WireAlg::Sha2_256).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify(AsymmetricAlgorithm::Ed25519, &kp.public_der, b"message", WireAlg::Sha2_256, &sig).unwrap());
        assert!(!verify(AsymmetricAlgorithm::Ed25519, &kp.public_der, b"tampered", WireAlg::Sha2_256, &sig).unwrap());
    }

    #[test]
    fn ecdsa_p256_sign_verify_roundtrip() {
        let kp = generate_keypair(AsymmetricAlgorithm::EcdsaP256).unwrap();
        let sig = sign(AsymmetricAlgorithm::EcdsaP256, &kp.secret_der, b"message", WireAlg::Sha2_256).unwrap();
        assert!(verify(AsymmetricAlgorithm::EcdsaP256, &kp.public_der, b"message", WireAlg::Sha2_256, &sig).unwrap());
    }

    #[test]
    fn hmac_differs_by_key() {
        let a = hmac(b"key-a", b"input", WireAlg::Sha2_256).unwrap();
        let b = hmac(b"key-b", b"input", WireAlg::Sha2_256).unwrap();
        assert_ne!(a, b);
    }
}
