//! Self-describing wire envelopes, pinned bit-exact:
//!
//! - ciphertext: `vault:v<version>:<base64(nonce)>:<base64(tag)>:<base64(ciphertext)>`
//! - signature:  `vault:v<version>:<alg>:<base64(sig)>`
//! - HMAC:       `vault:v<version>:<alg>:<base64(hmac)>`
//!
//! `nonce` is exactly 12 bytes, `tag` is exactly 16 bytes.

use crate::aead::{NONCE_BYTES, TAG_BYTES};
use crate::error::CryptoError;
use base64::{engine::general_purpose::STANDARD, Engine};

const PREFIX: &str = "vault";

/// A parsed `vault:v{version}:{nonce}:{tag}:{ciphertext}` envelope.
#[derive(Debug, Clone)]
pub struct CiphertextEnvelope {
    pub version: u32,
    pub nonce: [u8; NONCE_BYTES],
    pub tag: [u8; TAG_BYTES],
    pub ciphertext: Vec<u8>,
}

impl CiphertextEnvelope {
    /// `aes-gcm` appends the tag to the ciphertext; this splits it back out.
    pub fn encode(version: u32, nonce: &[u8; NONCE_BYTES], sealed: &[u8]) -> Result<String, CryptoError> {
        if sealed.len() < TAG_BYTES {
            return Err(CryptoError);
        }
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_BYTES);
        Ok(format!(
            "{PREFIX}:v{version}:{}:{}:{}",
            STANDARD.encode(nonce),
            STANDARD.encode(tag),
            STANDARD.encode(ciphertext),
        ))
    }

    pub fn decode(s: &str) -> Result<Self, CryptoError> {
        let mut parts = s.split(':');
        if parts.next() != Some(PREFIX) {
            return Err(CryptoError);
        }
        let version = parse_version(parts.next().ok_or(CryptoError)?)?;
        let nonce_b64 = parts.next().ok_or(CryptoError)?;
        let tag_b64 = parts.next().ok_or(CryptoError)?;
        let ct_b64 = parts.next().ok_or(CryptoError)?;
        if parts.next().is_some() {
            return Err(CryptoError);
        }

        let nonce_bytes = STANDARD.decode(nonce_b64).map_err(|_| CryptoError)?;
        let tag_bytes = STANDARD.decode(tag_b64).map_err(|_| CryptoError)?;
        let ciphertext = STANDARD.decode(ct_b64).map_err(|_| CryptoError)?;

        if nonce_bytes.len() != NONCE_BYTES || tag_bytes.len() != TAG_BYTES {
            return Err(CryptoError);
        }

        let mut nonce = [0u8; NONCE_BYTES];
        nonce.copy_from_slice(&nonce_bytes);
        let mut tag = [0u8; TAG_BYTES];
        tag.copy_from_slice(&tag_bytes);

        Ok(CiphertextEnvelope { version, nonce, tag, ciphertext })
    }

    /// `ciphertext || tag`, the form `aead::open` expects.
    pub fn sealed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_BYTES);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }
}

/// Hash/HMAC algorithm identifiers usable on the wire. Only these two are
/// supported; anything else is rejected by the caller as `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireAlg {
    Sha2_256,
    Sha2_512,
}

impl WireAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireAlg::Sha2_256 => "sha2-256",
            WireAlg::Sha2_512 => "sha2-512",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sha2-256" => Some(WireAlg::Sha2_256),
            "sha2-512" => Some(WireAlg::Sha2_512),
            _ => None,
        }
    }
}

/// A parsed `vault:v{version}:{alg}:{base64(bytes)}` envelope, shared shape
/// for both the signature and HMAC wire formats.
#[derive(Debug, Clone)]
pub struct TaggedEnvelope {
    pub version: u32,
    pub alg: WireAlg,
    pub bytes: Vec<u8>,
}

impl TaggedEnvelope {
    pub fn encode(version: u32, alg: WireAlg, bytes: &[u8]) -> String {
        format!("{PREFIX}:v{version}:{}:{}", alg.as_str(), STANDARD.encode(bytes))
    }

    pub fn decode(s: &str) -> Result<Self, CryptoError> {
        let mut parts = s.split(':');
        if parts.next() != Some(PREFIX) {
            return Err(CryptoError);
        }
        let version = parse_version(parts.next().ok_or(CryptoError)?)?;
        let alg = WireAlg::parse(parts.next().ok_or(CryptoError)?).ok_or(CryptoError)?;
        let bytes = STANDARD.decode(parts.next().ok_or(CryptoError)?).map_err(|_| CryptoError)?;
        if parts.next().is_some() {
            return Err(CryptoError);
        }
        Ok(TaggedEnvelope { version, alg, bytes })
    }
}

fn parse_version(s: &str) -> Result<u32, CryptoError> {
    let digits = s.strip_prefix('v').ok_or(CryptoError)?;
    digits.parse::<u32>().map_err(|_| CryptoError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ciphertext_envelope_roundtrip() {
        let nonce = [3u8; NONCE_BYTES];
        let sealed = {
            let mut v = vec![9u8; 20];
            v.extend_from_slice(&[1u8; TAG_BYTES]);
            v
        };
        let s = CiphertextEnvelope::encode(4, &nonce, &sealed).unwrap();
        assert!(s.starts_with("vault:v4:"));
        let parsed = CiphertextEnvelope::decode(&s).unwrap();
        assert_eq!(parsed.version, 4);
        assert_eq!(parsed.nonce, nonce);
        assert_eq!(parsed.sealed_bytes(), sealed);
    }

    #[test]
    fn tagged_envelope_roundtrip() {
        let s = TaggedEnvelope::encode(2, WireAlg::Sha2_256, b"sig-bytes");
        assert_eq!(s, format!("vault:v2:sha2-256:{}", STANDARD.encode(b"sig-bytes")));
        let parsed = TaggedEnvelope::decode(&s).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.alg, WireAlg::Sha2_256);
        assert_eq!(parsed.bytes, b"sig-bytes");
    }

    #[test]
    fn rejects_malformed_prefix() {
        assert!(CiphertextEnvelope::decode("nope:v1:a:b:c").is_err());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CiphertextEnvelope::decode("vault:v1:a:b").is_err());
    }
}
