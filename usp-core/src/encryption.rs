//! Encryption service (C3): AES-GCM encrypt/decrypt against the unsealed
//! master key, producing the versioned self-describing ciphertext envelope.

use crate::error::{Result, UspError};
use crate::seal::SealManager;
use crate::storage::{InMemoryRepository, Repository};
use std::sync::Arc;
use usp_crypto::{aead, CiphertextEnvelope};

#[derive(Debug, Clone)]
struct KeyRecord {
    /// One derived key per version; index 0 is version 1. Each entry is the
    /// raw 32-byte key, itself wrapped by the master key at rest by the
    /// caller's storage layer — kept in memory here for the encryption
    /// service's own use within a single unsealed epoch.
    versions: Vec<[u8; 32]>,
    min_decryption_version: u32,
}

pub struct EncryptionService {
    seal: Arc<SealManager>,
    keys: InMemoryRepository<String, KeyRecord>,
}

impl EncryptionService {
    pub fn new(seal: Arc<SealManager>) -> Self {
        Self { seal, keys: InMemoryRepository::new() }
    }

    fn get_or_create_key(&self, key_name: &str) -> Result<KeyRecord> {
        if let Some(record) = self.keys.get(&key_name.to_string()) {
            return Ok(record);
        }
        let fresh = self.seal.with_master_key(|master_key| {
            let derived = usp_crypto::kdf::derive_key(master_key, b"encryption-service", key_name.as_bytes())?;
            Ok(KeyRecord { versions: vec![derived], min_decryption_version: 1 })
        })?;
        self.keys.put(key_name.to_string(), fresh.clone());
        Ok(fresh)
    }

    pub fn encrypt(&self, key_name: &str, plaintext: &[u8], context: Option<&[u8]>) -> Result<String> {
        let record = self.get_or_create_key(key_name)?;
        let version = record.versions.len() as u32;
        let key = record.versions.last().expect("at least one version");

        let nonce = aead::nonce()?;
        let sealed = aead::seal(key, &nonce, plaintext, context.unwrap_or(b""))?;
        Ok(CiphertextEnvelope::encode(version, &nonce, &sealed)?)
    }

    pub fn decrypt(&self, key_name: &str, ciphertext: &str, context: Option<&[u8]>) -> Result<Vec<u8>> {
        let record = self.keys.get(&key_name.to_string()).ok_or(UspError::NotFound)?;
        let envelope = CiphertextEnvelope::decode(ciphertext)?;

        if envelope.version < record.min_decryption_version {
            return Err(UspError::IntegrityError("ciphertext version below minimum decryption version".into()));
        }
        let key = record
            .versions
            .get((envelope.version - 1) as usize)
            .ok_or_else(|| UspError::IntegrityError("unknown key version".into()))?;

        let plaintext = aead::open(key, &envelope.nonce, &envelope.sealed_bytes(), context.unwrap_or(b""))?;
        Ok(plaintext)
    }

    /// Decrypt then re-encrypt against the latest key version.
    pub fn rewrap(&self, key_name: &str, ciphertext: &str, context: Option<&[u8]>) -> Result<String> {
        let plaintext = self.decrypt(key_name, ciphertext, context)?;
        self.encrypt(key_name, &plaintext, context)
    }

    /// Bump the key's version; old versions remain decryptable until
    /// `raise_min_decryption_version` is called.
    pub fn rotate(&self, key_name: &str) -> Result<u32> {
        let mut record = self.keys.get(&key_name.to_string()).ok_or(UspError::NotFound)?;
        let next_version = record.versions.len() as u32 + 1;
        let derived = self.seal.with_master_key(|master_key| {
            usp_crypto::kdf::derive_key(master_key, b"encryption-service", format!("{key_name}:v{next_version}").as_bytes())
                .map_err(UspError::from)
        })?;
        record.versions.push(derived);
        self.keys.put(key_name.to_string(), record);
        Ok(next_version)
    }

    pub fn raise_min_decryption_version(&self, key_name: &str, min_version: u32) -> Result<()> {
        let mut record = self.keys.get(&key_name.to_string()).ok_or(UspError::NotFound)?;
        record.min_decryption_version = min_version;
        self.keys.put(key_name.to_string(), record);
        Ok(())
    }

    /// Envelope-encryption data key: a fresh CSPRNG key, returned in the
    /// clear once, plus that same key encrypted under `key_name`.
    pub fn generate_data_key(&self, key_name: &str, bits: u32, context: Option<&[u8]>) -> Result<(Vec<u8>, String)> {
        let byte_len = match bits {
            128 => 16,
            256 => 32,
            _ => return Err(UspError::ValidationError("generateDataKey bits must be 128 or 256".into())),
        };
        let mut plaintext = vec![0u8; byte_len];
        usp_crypto::rand::fill(&mut plaintext)?;
        let ciphertext = self.encrypt(key_name, &plaintext, context)?;
        Ok((plaintext, ciphertext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        let seal = Arc::new(SealManager::new([5u8; 32]));
        let shares = seal.init(3, 2).unwrap();
        seal.unseal(shares[0].clone(), "test").unwrap();
        seal.unseal(shares[1].clone(), "test").unwrap();
        EncryptionService::new(seal)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let svc = service();
        let ct = svc.encrypt("k", b"hello", None).unwrap();
        assert!(ct.starts_with("vault:v1:"));
        let pt = svc.decrypt("k", &ct, None).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn context_mismatch_fails() {
        let svc = service();
        let ct = svc.encrypt("k", b"hello", Some(b"ctx-a")).unwrap();
        assert!(svc.decrypt("k", &ct, Some(b"ctx-b")).is_err());
    }

    #[test]
    fn rotate_bumps_version_old_still_decrypts() {
        let svc = service();
        let ct_v1 = svc.encrypt("k", b"v1-data", None).unwrap();
        let new_version = svc.rotate("k").unwrap();
        assert_eq!(new_version, 2);

        let ct_v2 = svc.encrypt("k", b"v2-data", None).unwrap();
        assert!(ct_v2.starts_with("vault:v2:"));

        assert_eq!(svc.decrypt("k", &ct_v1, None).unwrap(), b"v1-data");
        assert_eq!(svc.decrypt("k", &ct_v2, None).unwrap(), b"v2-data");
    }

    #[test]
    fn below_min_decryption_version_refused() {
        let svc = service();
        let ct_v1 = svc.encrypt("k", b"v1-data", None).unwrap();
        svc.rotate("k").unwrap();
        svc.raise_min_decryption_version("k", 2).unwrap();
        assert!(svc.decrypt("k", &ct_v1, None).is_err());
    }

    #[test]
    fn generate_data_key_envelope() {
        let svc = service();
        let (plaintext, ciphertext) = svc.generate_data_key("dek", 256, None).unwrap();
        assert_eq!(plaintext.len(), 32);
        let decrypted = svc.decrypt("dek", &ciphertext, None).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}
