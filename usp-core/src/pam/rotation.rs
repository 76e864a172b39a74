//! Credential rotation (C8): generate a new secret, apply it on the target
//! platform, verify it works, and fall back to reverting on failure rather
//! than leaving the account in an unknown state.

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::encryption::EncryptionService;
use crate::error::{Result, UspError};
use crate::pam::account::{Account, AccountStatus, AccountStore};
use crate::provider::RotationConnector;
use crate::storage::Repository;
use crate::types::{now, AccountId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const ENCRYPTION_KEY_NAME: &str = "pam-accounts";
const MIN_PASSWORD_LENGTH: usize = 20;

/// What to do when a rotation's post-rotation verification fails. The
/// default strategy attempts to revert the target platform to the prior
/// credential; a production deployment may page instead of revert for
/// platforms where reverting risks worse damage than a stale credential.
pub trait RecoveryStrategy: Send + Sync {
    fn recover(&self, account_ref: &str, connector: &dyn RotationConnector, previous_secret: &[u8], failed_secret: &[u8]) -> Result<()>;
}

#[derive(Default)]
pub struct RevertRecoveryStrategy;

impl RecoveryStrategy for RevertRecoveryStrategy {
    fn recover(&self, account_ref: &str, connector: &dyn RotationConnector, previous_secret: &[u8], _failed_secret: &[u8]) -> Result<()> {
        connector.rotate(account_ref, previous_secret)
    }
}

/// Looks up the right connector for a platform. One connector instance per
/// platform, shared across every account on that platform.
pub struct ConnectorRegistry {
    connectors: Mutex<HashMap<crate::pam::account::Platform, Arc<dyn RotationConnector>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self { connectors: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, platform: crate::pam::account::Platform, connector: Arc<dyn RotationConnector>) {
        self.connectors.lock().unwrap().insert(platform, connector);
    }

    fn get(&self, platform: crate::pam::account::Platform) -> Result<Arc<dyn RotationConnector>> {
        self.connectors.lock().unwrap().get(&platform).cloned().ok_or_else(|| UspError::NotSupported("no rotation connector registered for platform".into()))
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RotationEngine {
    accounts: AccountStore,
    connectors: Arc<ConnectorRegistry>,
    encryption: Arc<EncryptionService>,
    recovery: Arc<dyn RecoveryStrategy>,
    audit: Arc<AuditLog>,
}

impl RotationEngine {
    pub fn new(accounts: AccountStore, connectors: Arc<ConnectorRegistry>, encryption: Arc<EncryptionService>, recovery: Arc<dyn RecoveryStrategy>, audit: Arc<AuditLog>) -> Self {
        Self { accounts, connectors, encryption, recovery, audit }
    }

    /// Generate, apply, and verify a new credential for `account_id`. On
    /// verification failure, attempt to revert the target platform to the
    /// previous credential; if the revert itself fails the account is
    /// marked `rotationFailed` and an alert-class audit event is emitted.
    pub fn rotate(&self, account_id: AccountId) -> Result<()> {
        let mut account = self.accounts.get(&account_id).ok_or(UspError::NotFound)?;
        let connector = self.connectors.get(account.platform)?;

        let previous_secret = self.decrypt_password(&account)?;
        let new_secret = connector.generate(MIN_PASSWORD_LENGTH)?;

        if let Err(e) = connector.rotate(&account.account_ref, &new_secret) {
            self.audit_rotation(&account, false, Some(&e.to_string()));
            return Err(e);
        }

        match connector.verify(&account.account_ref, &new_secret) {
            Ok(true) => {
                let interval = (account.next_rotation - account.last_rotated).max(chrono::Duration::days(1));
                let encrypted = self.encryption.encrypt(ENCRYPTION_KEY_NAME, &new_secret, Some(account_id.to_string().as_bytes()))?;
                account.encrypted_password = encrypted;
                account.last_rotated = now();
                account.next_rotation = account.last_rotated + interval;
                account.status = AccountStatus::Active;
                self.accounts.put(account_id, account.clone());
                self.audit_rotation(&account, true, None);
                Ok(())
            }
            Ok(false) | Err(_) => {
                let recover_result = self.recovery.recover(&account.account_ref, connector.as_ref(), &previous_secret, &new_secret);
                if recover_result.is_err() {
                    account.status = AccountStatus::RotationFailed;
                    self.accounts.put(account_id, account.clone());
                    self.audit_rotation_failed(&account);
                }
                Err(UspError::ValidationError("rotation verification failed".into()))
            }
        }
    }

    fn decrypt_password(&self, account: &Account) -> Result<Vec<u8>> {
        self.encryption.decrypt(ENCRYPTION_KEY_NAME, &account.encrypted_password, Some(account.id.to_string().as_bytes()))
    }

    fn audit_rotation(&self, account: &Account, success: bool, detail: Option<&str>) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: if success { "pam.rotation.succeeded".into() } else { "pam.rotation.failed".into() },
            actor: Actor::System,
            resource: format!("accounts/{}", account.id),
            action: "rotate".into(),
            success,
            ip_address: None,
            user_agent: None,
            details: detail.map(|s| s.to_string()),
            correlation_id: None,
        });
    }

    fn audit_rotation_failed(&self, account: &Account) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: "pam.rotation.alert".into(),
            actor: Actor::System,
            resource: format!("accounts/{}", account.id),
            action: "rotate".into(),
            success: false,
            ip_address: None,
            user_agent: None,
            details: Some("rotation verification and revert both failed; account marked rotationFailed".into()),
            correlation_id: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::IntegrityResult;
    use crate::pam::account::{AccountManager, NewAccount, Platform};
    use crate::pam::checkout::ApprovalPolicy;
    use crate::pam::safe::{NewSafe, SafeManager};
    use crate::seal::SealManager;
    use crate::storage::InMemoryRepository;

    struct FailingConnector;
    impl RotationConnector for FailingConnector {
        fn verify(&self, _account_ref: &str, _secret: &[u8]) -> Result<bool> {
            Ok(false)
        }
        fn rotate(&self, _account_ref: &str, _new_secret: &[u8]) -> Result<()> {
            Ok(())
        }
        fn generate(&self, min_length: usize) -> Result<Vec<u8>> {
            Ok(usp_crypto::rand::random_password(min_length.max(16))?.into_bytes())
        }
    }

    struct FailingRecovery;
    impl RecoveryStrategy for FailingRecovery {
        fn recover(&self, _account_ref: &str, _connector: &dyn RotationConnector, _previous: &[u8], _failed: &[u8]) -> Result<()> {
            Err(UspError::ExternalError("revert also failed".into()))
        }
    }

    fn harness() -> (RotationEngine, AccountManager, UserId, crate::types::SafeId) {
        let seal = Arc::new(SealManager::new([9u8; 32]));
        let shares = seal.init(3, 2).unwrap();
        seal.unseal(shares[0].clone(), "test").unwrap();
        seal.unseal(shares[1].clone(), "test").unwrap();
        let encryption = Arc::new(EncryptionService::new(seal));

        let safes = Arc::new(SafeManager::new(Arc::new(InMemoryRepository::new()), Arc::new(AuditLog::new())));
        let owner = UserId::new();
        let safe_id = safes
            .create_safe(NewSafe {
                name: "prod-db".into(),
                owner_id: owner,
                rotation_interval_days: 30,
                max_checkout_duration_minutes: 60,
                requires_approval: false,
                approval_policy: ApprovalPolicy::SingleApprover,
                approvers: vec![],
                rotate_on_checkin: true,
            })
            .unwrap();

        let audit = Arc::new(AuditLog::new());
        let accounts = AccountManager::new(Arc::new(InMemoryRepository::new()), safes, encryption.clone(), audit.clone());
        let registry = Arc::new(ConnectorRegistry::new());
        let engine = RotationEngine::new(accounts.store(), registry, encryption, Arc::new(RevertRecoveryStrategy), audit);
        (engine, accounts, owner, safe_id)
    }

    #[test]
    fn successful_rotation_updates_account_and_emits_success_audit() {
        use crate::provider::SimulatedRotationConnector;
        let (engine, accounts, owner, safe_id) = harness();
        let id = accounts
            .create_account(owner, NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "initial".into(), rotation_interval_days: 30 })
            .unwrap();
        engine.connectors.register(Platform::Postgres, Arc::new(SimulatedRotationConnector));

        let before = accounts.get(id).unwrap();
        engine.rotate(id).unwrap();
        let after = accounts.get(id).unwrap();

        assert_ne!(after.encrypted_password, before.encrypted_password);
        assert_eq!(after.status, AccountStatus::Active);
        assert_eq!(engine.audit.verify_integrity(), IntegrityResult::Ok);
    }

    #[test]
    fn failed_verification_with_failed_revert_marks_rotation_failed() {
        let (engine, accounts, owner, safe_id) = harness();
        let engine = RotationEngine::new(engine.accounts.clone(), engine.connectors.clone(), engine.encryption.clone(), Arc::new(FailingRecovery), engine.audit.clone());
        let id = accounts
            .create_account(owner, NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "initial".into(), rotation_interval_days: 30 })
            .unwrap();
        engine.connectors.register(Platform::Postgres, Arc::new(FailingConnector));

        assert!(engine.rotate(id).is_err());
        assert_eq!(accounts.get(id).unwrap().status, AccountStatus::RotationFailed);
    }
}
