//! A single configuration struct, validated once at startup (fail-fast)
//! rather than threaded through as dynamically-typed dictionaries.

use crate::error::{Result, UspError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    Hs256,
    Rs256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_algorithm: JwtAlgorithm,
    /// HS256 signing secret, or RS256 private key PEM. Required length is
    /// validated for HS256 (>= 32 bytes).
    pub jwt_signing_key: Vec<u8>,
    pub jwt_access_ttl_secs: i64,
    pub jwt_refresh_ttl_secs: i64,
    pub lockout_threshold: u32,
    pub lockout_cooldown_secs: i64,
    pub max_concurrent_sessions: usize,
    /// Set when deploying to production: enforces the WebAuthn RP-id check.
    pub production_deployment: bool,
    pub webauthn_rp_id: Option<String>,
    pub webauthn_origin: Option<String>,
    pub biometric_enabled: bool,
    pub biometric_encryption_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealConfigOptions {
    /// 32-byte operator-supplied key-encryption-key, base64 at the
    /// configuration boundary, raw bytes here.
    pub kek: Vec<u8>,
    pub default_shares: u8,
    pub default_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    pub default_max_versions: u32,
    pub cas_required_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitConfig {
    pub allowed_types: Vec<String>,
    pub deletion_allowed_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PamConfig {
    pub max_checkout_duration_minutes_default: u32,
    pub rotation_min_complexity_length: usize,
    pub connector_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UspConfig {
    pub seal: SealConfigOptions,
    pub kv: KvConfig,
    pub transit: TransitConfig,
    pub auth: AuthConfig,
    pub pam: PamConfig,
    pub audit: AuditConfig,
}

impl UspConfig {
    /// Fail-fast validation, run once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.seal.kek.len() != 32 {
            return Err(UspError::ValidationError("seal.kek must be exactly 32 bytes".into()));
        }
        if self.seal.default_threshold == 0 || self.seal.default_threshold > self.seal.default_shares {
            return Err(UspError::ValidationError("seal: threshold must be in 1..=shares".into()));
        }
        if self.seal.default_shares == 0 {
            return Err(UspError::ValidationError("seal.default_shares must be >= 1".into()));
        }

        match self.auth.jwt_algorithm {
            JwtAlgorithm::Hs256 if self.auth.jwt_signing_key.len() < 32 => {
                return Err(UspError::ValidationError("auth.jwt_signing_key too short for HS256".into()));
            }
            JwtAlgorithm::Rs256 if self.auth.jwt_signing_key.is_empty() => {
                return Err(UspError::ValidationError("auth.jwt_signing_key (RSA PEM) is required for RS256".into()));
            }
            _ => {}
        }

        if self.auth.production_deployment {
            let rp_id = self.auth.webauthn_rp_id.as_deref().unwrap_or("");
            let origin = self.auth.webauthn_origin.as_deref().unwrap_or("");
            if rp_id.is_empty() || rp_id == "localhost" {
                return Err(UspError::ValidationError("webauthn_rp_id must not be loopback/localhost in production".into()));
            }
            if origin.contains("localhost") || origin.contains("127.0.0.1") {
                return Err(UspError::ValidationError("webauthn_origin must not be loopback in production".into()));
            }
        }

        if self.auth.biometric_enabled && self.auth.biometric_encryption_key.is_none() {
            return Err(UspError::ValidationError("biometric module enabled but biometric_encryption_key is not configured".into()));
        }

        if self.auth.max_concurrent_sessions == 0 {
            return Err(UspError::ValidationError("auth.max_concurrent_sessions must be >= 1".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> UspConfig {
        UspConfig {
            seal: SealConfigOptions { kek: vec![0u8; 32], default_shares: 5, default_threshold: 3 },
            kv: KvConfig { default_max_versions: 10, cas_required_default: false },
            transit: TransitConfig { allowed_types: vec!["aes256-gcm".into()], deletion_allowed_default: false },
            auth: AuthConfig {
                jwt_algorithm: JwtAlgorithm::Hs256,
                jwt_signing_key: vec![1u8; 32],
                jwt_access_ttl_secs: 900,
                jwt_refresh_ttl_secs: 86400,
                lockout_threshold: 5,
                lockout_cooldown_secs: 900,
                max_concurrent_sessions: 5,
                production_deployment: false,
                webauthn_rp_id: None,
                webauthn_origin: None,
                biometric_enabled: false,
                biometric_encryption_key: None,
            },
            pam: PamConfig { max_checkout_duration_minutes_default: 60, rotation_min_complexity_length: 16, connector_timeout_secs: 30 },
            audit: AuditConfig { retention_days: 365 },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_short_kek() {
        let mut c = base_config();
        c.seal.kek = vec![0u8; 16];
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_threshold_above_shares() {
        let mut c = base_config();
        c.seal.default_threshold = 9;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_localhost_rp_id_in_production() {
        let mut c = base_config();
        c.auth.production_deployment = true;
        c.auth.webauthn_rp_id = Some("localhost".into());
        c.auth.webauthn_origin = Some("https://localhost".into());
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_biometric_without_key() {
        let mut c = base_config();
        c.auth.biometric_enabled = true;
        assert!(c.validate().is_err());
    }
}
