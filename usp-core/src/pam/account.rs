//! Privileged accounts (C8): the credential under management for one
//! platform login, stored only as ciphertext, with rotation scheduling
//! metadata.

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::encryption::EncryptionService;
use crate::error::{Result, UspError};
use crate::pam::safe::{SafeManager, SafePermission};
use crate::storage::{InMemoryRepository, Repository};
use crate::types::{now, AccountId, SafeId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const REVEAL_DISPLAY_TTL_SECONDS: i64 = 30;

/// Satisfied by anything that can confirm a caller has cleared a step-up
/// challenge for a resource. Implemented by `auth::session::SessionManager`;
/// kept as a capability trait so `pam::account` never needs to depend on
/// `auth::session` directly.
pub trait ApprovalGate: Send + Sync {
    fn has_active_step_up(&self, actor: UserId, resource: &str) -> bool;
}

/// A revealed password, valid for a single display and only until
/// `expires_at`. Callers that hold onto this past its expiry are expected to
/// discard it and reveal again rather than show stale material.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealedSecret {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Postgres,
    MySql,
    Windows,
    Linux,
    NetworkDevice,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    RotationFailed,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub safe_id: SafeId,
    pub platform: Platform,
    /// The identity the connector authenticates as, e.g. `"postgres@db-1"`.
    pub account_ref: String,
    pub encrypted_password: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub last_rotated: DateTime<Utc>,
    pub next_rotation: DateTime<Utc>,
}

pub type AccountStore = Arc<InMemoryRepository<AccountId, Account>>;

const ENCRYPTION_KEY_NAME: &str = "pam-accounts";

pub struct NewAccount {
    pub safe_id: SafeId,
    pub platform: Platform,
    pub account_ref: String,
    pub initial_password: String,
    pub rotation_interval_days: i64,
}

pub struct AccountManager {
    accounts: AccountStore,
    safes: Arc<SafeManager>,
    encryption: Arc<EncryptionService>,
    audit: Arc<AuditLog>,
    approval_gate: Option<Arc<dyn ApprovalGate>>,
}

impl AccountManager {
    pub fn new(accounts: AccountStore, safes: Arc<SafeManager>, encryption: Arc<EncryptionService>, audit: Arc<AuditLog>) -> Self {
        Self { accounts, safes, encryption, audit, approval_gate: None }
    }

    /// Attach a step-up approval gate. Reveals against a safe with
    /// `requiresApproval` set are rejected with `StepUpRequired` unless the
    /// gate reports an active step-up for the caller, or the reveal goes
    /// through `reveal_preapproved` (the checkout workflow's own route).
    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval_gate = Some(gate);
        self
    }

    pub fn store(&self) -> AccountStore {
        self.accounts.clone()
    }

    pub fn create_account(&self, actor: UserId, input: NewAccount) -> Result<AccountId> {
        let safe = self.safes.get(input.safe_id)?;
        self.safes.authorize(&safe, actor, SafePermission::Write)?;

        let id = AccountId::new();
        let created_at = now();
        let encrypted_password = self.encryption.encrypt(ENCRYPTION_KEY_NAME, input.initial_password.as_bytes(), Some(id.to_string().as_bytes()))?;
        self.accounts.put(
            id,
            Account {
                id,
                safe_id: input.safe_id,
                platform: input.platform,
                account_ref: input.account_ref,
                encrypted_password,
                status: AccountStatus::Active,
                created_at,
                last_rotated: created_at,
                next_rotation: created_at + Duration::days(input.rotation_interval_days),
            },
        );
        Ok(id)
    }

    pub fn get(&self, account_id: AccountId) -> Result<Account> {
        self.accounts.get(&account_id).ok_or(UspError::NotFound)
    }

    /// The plaintext password, gated on the caller holding at least read
    /// access to the owning safe, and, if the safe requires approval, on an
    /// active step-up for this resource. Every call is audited, and the
    /// result is a single-use display valid for `REVEAL_DISPLAY_TTL_SECONDS`.
    pub fn reveal(&self, actor: UserId, account_id: AccountId) -> Result<RevealedSecret> {
        self.reveal_inner(actor, account_id, true)
    }

    /// Reveal without the step-up gate, for callers that have already
    /// enforced their own approval policy (the checkout workflow, which only
    /// reaches this once its `ApprovalPolicy` is satisfied).
    pub(crate) fn reveal_preapproved(&self, actor: UserId, account_id: AccountId) -> Result<RevealedSecret> {
        self.reveal_inner(actor, account_id, false)
    }

    fn reveal_inner(&self, actor: UserId, account_id: AccountId, enforce_step_up: bool) -> Result<RevealedSecret> {
        let account = self.get(account_id)?;
        let safe = self.safes.get(account.safe_id)?;
        self.safes.authorize(&safe, actor, SafePermission::Read)?;

        if enforce_step_up && safe.requires_approval {
            let resource = format!("accounts/{account_id}");
            let satisfied = self.approval_gate.as_ref().is_some_and(|gate| gate.has_active_step_up(actor, &resource));
            if !satisfied {
                self.audit_reveal(actor, account_id, false);
                return Err(UspError::StepUpRequired);
            }
        }

        let plaintext = self.encryption.decrypt(ENCRYPTION_KEY_NAME, &account.encrypted_password, Some(account_id.to_string().as_bytes()))?;
        let value = String::from_utf8(plaintext).map_err(|_| UspError::IntegrityError("decrypted account password is not valid utf-8".into()))?;
        self.audit_reveal(actor, account_id, true);
        Ok(RevealedSecret { value, expires_at: now() + Duration::seconds(REVEAL_DISPLAY_TTL_SECONDS) })
    }

    fn audit_reveal(&self, actor: UserId, account_id: AccountId, success: bool) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: "pam.account.revealed".into(),
            actor: Actor::User(actor),
            resource: format!("accounts/{account_id}"),
            action: "reveal".into(),
            success,
            ip_address: None,
            user_agent: None,
            details: None,
            correlation_id: None,
        });
    }

    pub fn list_due_for_rotation(&self) -> Vec<Account> {
        let at = now();
        self.accounts.list().into_iter().filter(|a| a.status == AccountStatus::Active && a.next_rotation <= at).collect()
    }

    pub fn list_for_safe(&self, safe_id: SafeId) -> Vec<Account> {
        self.accounts.list().into_iter().filter(|a| a.safe_id == safe_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::pam::checkout::ApprovalPolicy;
    use crate::seal::SealManager;

    fn harness() -> (AccountManager, Arc<SafeManager>, UserId, SafeId) {
        harness_with(false)
    }

    fn harness_with(requires_approval: bool) -> (AccountManager, Arc<SafeManager>, UserId, SafeId) {
        let seal = Arc::new(SealManager::new([7u8; 32]));
        let shares = seal.init(3, 2).unwrap();
        seal.unseal(shares[0].clone(), "test").unwrap();
        seal.unseal(shares[1].clone(), "test").unwrap();
        let encryption = Arc::new(EncryptionService::new(seal));

        let safes = Arc::new(SafeManager::new(Arc::new(InMemoryRepository::new()), Arc::new(AuditLog::new())));
        let owner = UserId::new();
        let safe_id = safes
            .create_safe(crate::pam::safe::NewSafe {
                name: "prod-db".into(),
                owner_id: owner,
                rotation_interval_days: 30,
                max_checkout_duration_minutes: 60,
                requires_approval,
                approval_policy: ApprovalPolicy::SingleApprover,
                approvers: vec![],
                rotate_on_checkin: true,
            })
            .unwrap();

        let accounts = AccountManager::new(Arc::new(InMemoryRepository::new()), safes.clone(), encryption, Arc::new(AuditLog::new()));
        (accounts, safes, owner, safe_id)
    }

    #[test]
    fn create_then_reveal_round_trips_password() {
        let (accounts, _safes, owner, safe_id) = harness();
        let id = accounts
            .create_account(
                owner,
                NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "hunter2".into(), rotation_interval_days: 30 },
            )
            .unwrap();
        assert_eq!(accounts.reveal(owner, id).unwrap().value, "hunter2");
    }

    #[test]
    fn reveal_without_step_up_is_rejected_when_safe_requires_approval() {
        let (accounts, _safes, owner, safe_id) = harness_with(true);
        let id = accounts
            .create_account(
                owner,
                NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "hunter2".into(), rotation_interval_days: 30 },
            )
            .unwrap();
        assert_eq!(accounts.reveal(owner, id), Err(UspError::StepUpRequired));
        // the checkout workflow's own route bypasses the gate once its approval policy is satisfied.
        assert_eq!(accounts.reveal_preapproved(owner, id).unwrap().value, "hunter2");
    }

    #[test]
    fn reveal_forbidden_without_safe_access() {
        let (accounts, _safes, owner, safe_id) = harness();
        let stranger = UserId::new();
        let id = accounts
            .create_account(
                owner,
                NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "hunter2".into(), rotation_interval_days: 30 },
            )
            .unwrap();
        assert_eq!(accounts.reveal(stranger, id), Err(UspError::Forbidden));
    }

    #[test]
    fn next_rotation_is_created_at_plus_interval() {
        let (accounts, _safes, owner, safe_id) = harness();
        let id = accounts
            .create_account(
                owner,
                NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "hunter2".into(), rotation_interval_days: 30 },
            )
            .unwrap();
        let account = accounts.get(id).unwrap();
        assert_eq!(account.next_rotation, account.created_at + Duration::days(30));
    }

    #[test]
    fn due_for_rotation_only_lists_past_due_active_accounts() {
        let (accounts, _safes, owner, safe_id) = harness();
        let id = accounts
            .create_account(
                owner,
                NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "hunter2".into(), rotation_interval_days: 30 },
            )
            .unwrap();
        assert!(accounts.list_due_for_rotation().is_empty());

        let mut account = accounts.get(id).unwrap();
        account.next_rotation = now() - Duration::days(1);
        accounts.accounts.put(id, account);
        assert_eq!(accounts.list_due_for_rotation().len(), 1);
    }
}
