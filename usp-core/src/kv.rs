//! Versioned KV secret engine (C4).

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::encryption::EncryptionService;
use crate::error::{Result, UspError};
use crate::storage::{InMemoryRepository, Repository};
use crate::types::{normalize_path, now, UserId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

const SECRET_ENCRYPTION_KEY: &str = "secret-encryption-key";

#[derive(Debug, Clone)]
pub struct SecretVersion {
    pub version: u32,
    pub ciphertext: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub is_destroyed: bool,
}

#[derive(Debug, Clone)]
struct SecretMetadata {
    current_version: u32,
    max_versions: u32,
    cas_required: bool,
    versions: BTreeMap<u32, SecretVersion>,
}

pub struct KvEngine {
    encryption: Arc<EncryptionService>,
    secrets: InMemoryRepository<String, SecretMetadata>,
    default_max_versions: u32,
    audit: Arc<AuditLog>,
}

impl KvEngine {
    pub fn new(encryption: Arc<EncryptionService>, default_max_versions: u32, audit: Arc<AuditLog>) -> Self {
        Self { encryption, secrets: InMemoryRepository::new(), default_max_versions, audit }
    }

    fn audit_secret(&self, actor: UserId, event_type: &str, path: &str, success: bool) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: event_type.into(),
            actor: Actor::User(actor),
            resource: format!("secret:{path}"),
            action: event_type.into(),
            success,
            ip_address: None,
            user_agent: None,
            details: None,
            correlation_id: None,
        });
    }

    pub fn write(&self, actor: UserId, path: &str, data: &serde_json::Value, cas: Option<u32>) -> Result<u32> {
        let path = normalize_path(path);
        let mut metadata = self.secrets.get(&path);

        if let Some(meta) = &metadata {
            if meta.cas_required && cas.is_none() {
                self.audit_secret(actor, "secret.write", &path, false);
                return Err(UspError::CasMismatch);
            }
            if let Some(expected) = cas {
                if expected != meta.current_version {
                    self.audit_secret(actor, "secret.write", &path, false);
                    return Err(UspError::CasMismatch);
                }
            }
        } else if let Some(0) = cas {
            // "create only": fine, there's nothing to collide with.
        }

        let serialized = serde_json::to_vec(data).map_err(|e| UspError::ValidationError(e.to_string()))?;
        let ciphertext = self.encryption.encrypt(SECRET_ENCRYPTION_KEY, &serialized, Some(path.as_bytes()))?;

        let meta = metadata.get_or_insert_with(|| SecretMetadata {
            current_version: 0,
            max_versions: self.default_max_versions,
            cas_required: false,
            versions: BTreeMap::new(),
        });

        let new_version = meta.current_version + 1;
        meta.current_version = new_version;
        meta.versions.insert(
            new_version,
            SecretVersion { version: new_version, ciphertext, created_at: now(), is_deleted: false, is_destroyed: false },
        );

        prune(meta);

        self.secrets.put(path.clone(), meta.clone());
        self.audit_secret(actor, "secret.write", &path, true);
        Ok(new_version)
    }

    pub fn read(&self, path: &str, version: Option<u32>) -> Result<Option<serde_json::Value>> {
        let path = normalize_path(path);
        let meta = match self.secrets.get(&path) {
            Some(m) => m,
            None => return Ok(None),
        };

        let target_version = version.unwrap_or(meta.current_version);
        let entry = match meta.versions.get(&target_version) {
            Some(v) => v,
            None => return Ok(None),
        };

        if entry.is_destroyed {
            return Err(UspError::IntegrityError(format!("version {target_version} of {path} has been destroyed")));
        }
        if entry.is_deleted {
            return Ok(None);
        }

        let plaintext = self.encryption.decrypt(SECRET_ENCRYPTION_KEY, &entry.ciphertext, Some(path.as_bytes()))?;
        let value: serde_json::Value = serde_json::from_slice(&plaintext).map_err(|e| UspError::IntegrityError(e.to_string()))?;
        Ok(Some(value))
    }

    pub fn delete(&self, actor: UserId, path: &str, versions: &[u32]) -> Result<()> {
        let path = normalize_path(path);
        let mut meta = match self.secrets.get(&path) {
            Some(m) => m,
            None => {
                self.audit_secret(actor, "secret.delete", &path, false);
                return Err(UspError::NotFound);
            }
        };
        for v in versions {
            if let Some(entry) = meta.versions.get_mut(v) {
                entry.is_deleted = true;
            }
        }
        self.secrets.put(path.clone(), meta);
        self.audit_secret(actor, "secret.delete", &path, true);
        Ok(())
    }

    pub fn undelete(&self, actor: UserId, path: &str, versions: &[u32]) -> Result<()> {
        let path = normalize_path(path);
        let mut meta = match self.secrets.get(&path) {
            Some(m) => m,
            None => {
                self.audit_secret(actor, "secret.undelete", &path, false);
                return Err(UspError::NotFound);
            }
        };
        for v in versions {
            if let Some(entry) = meta.versions.get_mut(v) {
                if entry.is_destroyed {
                    self.audit_secret(actor, "secret.undelete", &path, false);
                    return Err(UspError::InvalidState);
                }
                entry.is_deleted = false;
            }
        }
        self.secrets.put(path.clone(), meta);
        self.audit_secret(actor, "secret.undelete", &path, true);
        Ok(())
    }

    pub fn destroy(&self, actor: UserId, path: &str, versions: &[u32]) -> Result<()> {
        let path = normalize_path(path);
        let mut meta = match self.secrets.get(&path) {
            Some(m) => m,
            None => {
                self.audit_secret(actor, "secret.destroy", &path, false);
                return Err(UspError::NotFound);
            }
        };
        for v in versions {
            if let Some(entry) = meta.versions.get_mut(v) {
                entry.is_destroyed = true;
                entry.is_deleted = true;
                entry.ciphertext.clear();
            }
        }
        self.secrets.put(path.clone(), meta);
        self.audit_secret(actor, "secret.destroy", &path, true);
        Ok(())
    }

    /// Immediate child keys under `prefix`, split on `/`.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize_path(prefix);
        let mut children = std::collections::BTreeSet::new();
        for path in self.secrets.keys() {
            let rest = if prefix.is_empty() {
                path.as_str()
            } else if let Some(stripped) = path.strip_prefix(&format!("{prefix}/")) {
                stripped
            } else {
                continue;
            };
            if let Some(segment) = rest.split('/').next() {
                if !segment.is_empty() {
                    children.insert(segment.to_string());
                }
            }
        }
        children.into_iter().collect()
    }
}

fn prune(meta: &mut SecretMetadata) {
    let non_destroyed: Vec<u32> = meta
        .versions
        .values()
        .filter(|v| !v.is_destroyed && !v.is_deleted)
        .map(|v| v.version)
        .collect();
    if non_destroyed.len() <= meta.max_versions as usize {
        return;
    }
    let excess = non_destroyed.len() - meta.max_versions as usize;
    for version in non_destroyed.into_iter().take(excess) {
        if let Some(entry) = meta.versions.get_mut(&version) {
            entry.is_deleted = true;
        }
    }
}
