//! Transit engine (C5): named, versioned keys offered as an encryption
//! service, without exposing key material to the caller.

use crate::error::{Result, UspError};
use crate::seal::SealManager;
use crate::storage::{InMemoryRepository, Repository};
use std::sync::Arc;
use usp_crypto::signing::{self, AsymmetricAlgorithm};
use usp_crypto::{aead, CiphertextEnvelope, TaggedEnvelope, WireAlg};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitKeyType {
    Aes256Gcm,
    Rsa2048,
    Rsa4096,
    EcdsaP256,
    Ed25519,
}

impl TransitKeyType {
    fn is_asymmetric(&self) -> bool {
        !matches!(self, TransitKeyType::Aes256Gcm)
    }
}

#[derive(Clone)]
struct KeyVersion {
    symmetric: Option<[u8; 32]>,
    secret_der: Option<Zeroizing<Vec<u8>>>,
    public_der: Option<Vec<u8>>,
}

struct TransitKey {
    key_type: TransitKeyType,
    versions: Vec<KeyVersion>, // index 0 == version 1
    latest_version: u32,
    min_decryption_version: u32,
    min_encryption_version: u32,
    deletion_allowed: bool,
}

pub const MAX_BATCH_ITEMS: usize = 1000;

pub struct TransitEngine {
    seal: Arc<SealManager>,
    keys: InMemoryRepository<String, Arc<std::sync::RwLock<TransitKey>>>,
}

pub struct BatchResult<T> {
    pub ok: bool,
    pub value: Option<T>,
    pub error: Option<UspError>,
}

impl TransitEngine {
    pub fn new(seal: Arc<SealManager>) -> Self {
        Self { seal, keys: InMemoryRepository::new() }
    }

    pub fn create(&self, name: &str, key_type: TransitKeyType, exportable: bool, deletion_allowed: bool) -> Result<()> {
        let _ = exportable; // exportability is enforced at the reveal/export boundary, not here.
        if self.keys.get(&name.to_string()).is_some() {
            return Err(UspError::AlreadyExists);
        }

        let version = self.generate_version(name, 1, key_type)?;
        let key = TransitKey {
            key_type,
            versions: vec![version],
            latest_version: 1,
            min_decryption_version: 1,
            min_encryption_version: 1,
            deletion_allowed,
        };
        self.keys.put(name.to_string(), Arc::new(std::sync::RwLock::new(key)));
        Ok(())
    }

    fn generate_version(&self, name: &str, version: u32, key_type: TransitKeyType) -> Result<KeyVersion> {
        if key_type.is_asymmetric() {
            let algo = match key_type {
                TransitKeyType::Rsa2048 => AsymmetricAlgorithm::Rsa2048,
                TransitKeyType::Rsa4096 => AsymmetricAlgorithm::Rsa4096,
                TransitKeyType::EcdsaP256 => AsymmetricAlgorithm::EcdsaP256,
                TransitKeyType::Ed25519 => AsymmetricAlgorithm::Ed25519,
                TransitKeyType::Aes256Gcm => unreachable!(),
            };
            let kp = signing::generate_keypair(algo)?;
            Ok(KeyVersion { symmetric: None, secret_der: Some(kp.secret_der), public_der: Some(kp.public_der) })
        } else {
            let derived = self.seal.with_master_key(|master_key| {
                usp_crypto::kdf::derive_key(master_key, b"transit", format!("{name}:v{version}").as_bytes()).map_err(UspError::from)
            })?;
            Ok(KeyVersion { symmetric: Some(derived), secret_der: None, public_der: None })
        }
    }

    pub fn rotate(&self, name: &str) -> Result<u32> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        let mut guard = key.write().unwrap();
        let next_version = guard.latest_version + 1;
        let key_type = guard.key_type;
        let version = self.generate_version(name, next_version, key_type)?;
        guard.versions.push(version);
        guard.latest_version = next_version;
        Ok(next_version)
    }

    pub fn encrypt(&self, name: &str, plaintext: &[u8], context: Option<&[u8]>) -> Result<String> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        let guard = key.read().unwrap();
        if guard.key_type.is_asymmetric() {
            return Err(UspError::ValidationError("encrypt requires a symmetric key".into()));
        }
        let version = guard.latest_version;
        if version < guard.min_encryption_version {
            return Err(UspError::IntegrityError("latest version below minimum encryption version".into()));
        }
        let symmetric = guard.versions[(version - 1) as usize].symmetric.expect("symmetric key");
        let nonce = aead::nonce()?;
        let sealed = aead::seal(&symmetric, &nonce, plaintext, context.unwrap_or(b""))?;
        Ok(CiphertextEnvelope::encode(version, &nonce, &sealed)?)
    }

    pub fn decrypt(&self, name: &str, ciphertext: &str, context: Option<&[u8]>) -> Result<Vec<u8>> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        let guard = key.read().unwrap();
        let envelope = CiphertextEnvelope::decode(ciphertext)?;
        if envelope.version < guard.min_decryption_version {
            return Err(UspError::IntegrityError("ciphertext version below minimum decryption version".into()));
        }
        let symmetric = guard
            .versions
            .get((envelope.version - 1) as usize)
            .and_then(|v| v.symmetric)
            .ok_or_else(|| UspError::IntegrityError("unknown key version".into()))?;
        Ok(aead::open(&symmetric, &envelope.nonce, &envelope.sealed_bytes(), context.unwrap_or(b""))?)
    }

    pub fn rewrap(&self, name: &str, ciphertext: &str, context: Option<&[u8]>) -> Result<String> {
        let plaintext = self.decrypt(name, ciphertext, context)?;
        self.encrypt(name, &plaintext, context)
    }

    pub fn sign(&self, name: &str, input: &[u8], hash_alg: WireAlg) -> Result<String> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        let guard = key.read().unwrap();
        if !guard.key_type.is_asymmetric() {
            return Err(UspError::ValidationError("sign requires an asymmetric key".into()));
        }
        let version = guard.latest_version;
        let secret = guard.versions[(version - 1) as usize].secret_der.as_ref().expect("secret key");
        let algo = asymmetric_algo(guard.key_type);
        let sig = signing::sign(algo, secret, input, hash_alg)?;
        Ok(TaggedEnvelope::encode(version, hash_alg, &sig))
    }

    pub fn verify(&self, name: &str, input: &[u8], signature: &str) -> Result<bool> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        let guard = key.read().unwrap();
        let envelope = TaggedEnvelope::decode(signature)?;
        let public = guard
            .versions
            .get((envelope.version - 1) as usize)
            .and_then(|v| v.public_der.as_ref())
            .ok_or(UspError::NotFound)?;
        let algo = asymmetric_algo(guard.key_type);
        Ok(signing::verify(algo, public, input, envelope.alg, &envelope.bytes)?)
    }

    pub fn hmac(&self, name: &str, input: &[u8], hash_alg: WireAlg) -> Result<String> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        let guard = key.read().unwrap();
        let version = guard.latest_version;
        let symmetric = guard.versions[(version - 1) as usize].symmetric.ok_or(UspError::ValidationError("hmac requires a symmetric key".into()))?;
        let mac = signing::hmac(&symmetric, input, hash_alg)?;
        Ok(TaggedEnvelope::encode(version, hash_alg, &mac))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let key = self.keys.get(&name.to_string()).ok_or(UspError::NotFound)?;
        if !key.read().unwrap().deletion_allowed {
            return Err(UspError::Forbidden);
        }
        self.keys.delete(&name.to_string());
        Ok(())
    }

    pub fn batch_encrypt(&self, name: &str, items: &[Vec<u8>], context: Option<&[u8]>) -> Result<Vec<BatchResult<String>>> {
        if items.len() > MAX_BATCH_ITEMS {
            return Err(UspError::ValidationError(format!("batch size {} exceeds {MAX_BATCH_ITEMS}", items.len())));
        }
        Ok(items
            .iter()
            .map(|item| match self.encrypt(name, item, context) {
                Ok(v) => BatchResult { ok: true, value: Some(v), error: None },
                Err(e) => BatchResult { ok: false, value: None, error: Some(e) },
            })
            .collect())
    }

    pub fn batch_decrypt(&self, name: &str, items: &[String], context: Option<&[u8]>) -> Result<Vec<BatchResult<Vec<u8>>>> {
        if items.len() > MAX_BATCH_ITEMS {
            return Err(UspError::ValidationError(format!("batch size {} exceeds {MAX_BATCH_ITEMS}", items.len())));
        }
        Ok(items
            .iter()
            .map(|item| match self.decrypt(name, item, context) {
                Ok(v) => BatchResult { ok: true, value: Some(v), error: None },
                Err(e) => BatchResult { ok: false, value: None, error: Some(e) },
            })
            .collect())
    }
}

fn asymmetric_algo(key_type: TransitKeyType) -> AsymmetricAlgorithm {
    match key_type {
        TransitKeyType::Rsa2048 => AsymmetricAlgorithm::Rsa2048,
        TransitKeyType::Rsa4096 => AsymmetricAlgorithm::Rsa4096,
        TransitKeyType::EcdsaP256 => AsymmetricAlgorithm::EcdsaP256,
        TransitKeyType::Ed25519 => AsymmetricAlgorithm::Ed25519,
        TransitKeyType::Aes256Gcm => unreachable!(),
    }
}
