//! Privileged account checkout (C9): `pending -> active -> {checkedIn,
//! expired, forceCheckedIn}`. At most one non-terminal checkout exists per
//! account at any time.

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::error::{Result, UspError};
use crate::pam::account::AccountManager;
use crate::pam::rotation::RotationEngine;
use crate::pam::safe::{SafeManager, SafePermission};
use crate::storage::{InMemoryRepository, Repository};
use crate::types::{now, AccountId, CheckoutId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    SingleApprover,
    DualControl,
    AllApprovers,
    Majority,
}

impl ApprovalPolicy {
    fn satisfied(&self, approvals: usize, approver_pool: usize) -> bool {
        match self {
            ApprovalPolicy::SingleApprover => approvals >= 1,
            ApprovalPolicy::DualControl => approvals >= 2,
            ApprovalPolicy::AllApprovers => approver_pool > 0 && approvals >= approver_pool,
            ApprovalPolicy::Majority => approver_pool > 0 && approvals * 2 > approver_pool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Pending,
    Active,
    CheckedIn,
    Expired,
    ForceCheckedIn,
}

impl CheckoutState {
    fn is_terminal(self) -> bool {
        matches!(self, CheckoutState::CheckedIn | CheckoutState::Expired | CheckoutState::ForceCheckedIn)
    }
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub id: CheckoutId,
    pub account_id: AccountId,
    pub requested_by: UserId,
    pub reason: String,
    pub state: CheckoutState,
    pub requested_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub approvals: Vec<UserId>,
}

pub enum CheckoutOutcome {
    Active { checkout_id: CheckoutId, password: String },
    PendingApproval { checkout_id: CheckoutId },
}

pub type CheckoutStore = Arc<InMemoryRepository<CheckoutId, Checkout>>;

pub struct CheckoutManager {
    checkouts: CheckoutStore,
    accounts: Arc<AccountManager>,
    safes: Arc<SafeManager>,
    rotation: Arc<RotationEngine>,
    audit: Arc<AuditLog>,
}

impl CheckoutManager {
    pub fn new(checkouts: CheckoutStore, accounts: Arc<AccountManager>, safes: Arc<SafeManager>, rotation: Arc<RotationEngine>, audit: Arc<AuditLog>) -> Self {
        Self { checkouts, accounts, safes, rotation, audit }
    }

    fn non_terminal_for_account(&self, account_id: AccountId) -> Option<Checkout> {
        self.checkouts.list().into_iter().find(|c| c.account_id == account_id && !c.state.is_terminal())
    }

    pub fn request(&self, actor: UserId, account_id: AccountId, reason: String, duration_minutes: u32) -> Result<CheckoutOutcome> {
        let account = self.accounts.get(account_id)?;
        let safe = self.safes.get(account.safe_id)?;
        self.safes.authorize(&safe, actor, SafePermission::Read)?;

        if self.non_terminal_for_account(account_id).is_some() {
            return Err(UspError::InvalidState);
        }
        let capped_minutes = duration_minutes.min(safe.max_checkout_duration_minutes);

        let id = CheckoutId::new();
        let requested_at = now();

        if safe.requires_approval {
            self.checkouts.put(
                id,
                Checkout {
                    id,
                    account_id,
                    requested_by: actor,
                    reason,
                    state: CheckoutState::Pending,
                    requested_at,
                    activated_at: None,
                    expires_at: None,
                    checked_in_at: None,
                    approvals: Vec::new(),
                },
            );
            self.audit_checkout(actor, id, "pam.checkout.requested", true);
            return Ok(CheckoutOutcome::PendingApproval { checkout_id: id });
        }

        let password = self.accounts.reveal_preapproved(actor, account_id)?.value;
        self.checkouts.put(
            id,
            Checkout {
                id,
                account_id,
                requested_by: actor,
                reason,
                state: CheckoutState::Active,
                requested_at,
                activated_at: Some(requested_at),
                expires_at: Some(requested_at + Duration::minutes(capped_minutes as i64)),
                checked_in_at: None,
                approvals: Vec::new(),
            },
        );
        self.audit_checkout(actor, id, "pam.checkout.opened", true);
        Ok(CheckoutOutcome::Active { checkout_id: id, password })
    }

    pub fn approve(&self, approver: UserId, checkout_id: CheckoutId) -> Result<CheckoutOutcome> {
        let mut checkout = self.checkouts.get(&checkout_id).ok_or(UspError::NotFound)?;
        if checkout.state != CheckoutState::Pending {
            return Err(UspError::InvalidState);
        }
        let account = self.accounts.get(checkout.account_id)?;
        let safe = self.safes.get(account.safe_id)?;
        self.safes.authorize(&safe, approver, SafePermission::Manage)?;

        if !checkout.approvals.contains(&approver) {
            checkout.approvals.push(approver);
        }

        if !safe.approval_policy.satisfied(checkout.approvals.len(), safe.approvers.len()) {
            self.checkouts.put(checkout_id, checkout.clone());
            return Ok(CheckoutOutcome::PendingApproval { checkout_id });
        }

        let password = self.accounts.reveal_preapproved(checkout.requested_by, checkout.account_id)?.value;
        let activated_at = now();
        checkout.state = CheckoutState::Active;
        checkout.activated_at = Some(activated_at);
        checkout.expires_at = Some(activated_at + Duration::minutes(safe.max_checkout_duration_minutes as i64));
        self.checkouts.put(checkout_id, checkout.clone());
        self.audit_checkout(approver, checkout_id, "pam.checkout.opened", true);
        Ok(CheckoutOutcome::Active { checkout_id, password })
    }

    pub fn checkin(&self, actor: UserId, checkout_id: CheckoutId) -> Result<()> {
        let mut checkout = self.checkouts.get(&checkout_id).ok_or(UspError::NotFound)?;
        if checkout.state != CheckoutState::Active {
            return Err(UspError::InvalidState);
        }
        checkout.state = CheckoutState::CheckedIn;
        checkout.checked_in_at = Some(now());
        self.checkouts.put(checkout_id, checkout.clone());
        self.audit_checkout(actor, checkout_id, "pam.checkin", true);

        let account = self.accounts.get(checkout.account_id)?;
        let safe = self.safes.get(account.safe_id)?;
        if safe.rotate_on_checkin {
            self.rotation.rotate(checkout.account_id)?;
        }
        Ok(())
    }

    pub fn force_checkin(&self, actor: UserId, checkout_id: CheckoutId) -> Result<()> {
        let mut checkout = self.checkouts.get(&checkout_id).ok_or(UspError::NotFound)?;
        if checkout.state.is_terminal() {
            return Err(UspError::InvalidState);
        }
        let account = self.accounts.get(checkout.account_id)?;
        let safe = self.safes.get(account.safe_id)?;
        self.safes.authorize(&safe, actor, SafePermission::Manage)?;

        checkout.state = CheckoutState::ForceCheckedIn;
        checkout.checked_in_at = Some(now());
        self.checkouts.put(checkout_id, checkout.clone());
        self.audit_checkout(actor, checkout_id, "pam.checkout.forceCheckedIn", true);

        if safe.rotate_on_checkin {
            self.rotation.rotate(checkout.account_id)?;
        }
        Ok(())
    }

    /// Transition any `active` checkout past its deadline to `expired`. Call
    /// periodically from a background sweep.
    pub fn expire_overdue(&self) -> Vec<CheckoutId> {
        let at = now();
        let mut expired = Vec::new();
        for mut checkout in self.checkouts.list() {
            if checkout.state == CheckoutState::Active && checkout.expires_at.is_some_and(|deadline| deadline <= at) {
                checkout.state = CheckoutState::Expired;
                checkout.checked_in_at = Some(at);
                self.checkouts.put(checkout.id, checkout.clone());
                self.audit_checkout(checkout.requested_by, checkout.id, "pam.checkout.expired", true);
                expired.push(checkout.id);
            }
        }
        expired
    }

    pub fn get(&self, checkout_id: CheckoutId) -> Result<Checkout> {
        self.checkouts.get(&checkout_id).ok_or(UspError::NotFound)
    }

    fn audit_checkout(&self, actor: UserId, checkout_id: CheckoutId, action: &str, success: bool) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: action.into(),
            actor: Actor::User(actor),
            resource: format!("checkouts/{checkout_id}"),
            action: action.into(),
            success,
            ip_address: None,
            user_agent: None,
            details: None,
            correlation_id: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::encryption::EncryptionService;
    use crate::pam::account::{NewAccount, Platform};
    use crate::pam::rotation::{ConnectorRegistry, RevertRecoveryStrategy};
    use crate::pam::safe::NewSafe;
    use crate::provider::SimulatedRotationConnector;
    use crate::seal::SealManager;

    struct Harness {
        checkouts: CheckoutManager,
        accounts: Arc<AccountManager>,
        safes: Arc<SafeManager>,
        owner: UserId,
        account_id: AccountId,
        safe_id: crate::types::SafeId,
    }

    fn harness(requires_approval: bool, approval_policy: ApprovalPolicy, approvers: Vec<UserId>) -> Harness {
        let seal = Arc::new(SealManager::new([3u8; 32]));
        let shares = seal.init(3, 2).unwrap();
        seal.unseal(shares[0].clone(), "test").unwrap();
        seal.unseal(shares[1].clone(), "test").unwrap();
        let encryption = Arc::new(EncryptionService::new(seal));
        let audit = Arc::new(AuditLog::new());

        let safes = Arc::new(SafeManager::new(Arc::new(InMemoryRepository::new()), audit.clone()));
        let owner = UserId::new();
        let safe_id = safes
            .create_safe(NewSafe {
                name: "prod-db".into(),
                owner_id: owner,
                rotation_interval_days: 30,
                max_checkout_duration_minutes: 60,
                requires_approval,
                approval_policy,
                approvers,
                rotate_on_checkin: true,
            })
            .unwrap();

        let accounts = Arc::new(AccountManager::new(Arc::new(InMemoryRepository::new()), safes.clone(), encryption.clone(), audit.clone()));
        let account_id = accounts
            .create_account(owner, NewAccount { safe_id, platform: Platform::Postgres, account_ref: "postgres@db-1".into(), initial_password: "P".into(), rotation_interval_days: 30 })
            .unwrap();

        let registry = Arc::new(ConnectorRegistry::new());
        registry.register(Platform::Postgres, Arc::new(SimulatedRotationConnector));
        let rotation = Arc::new(RotationEngine::new(accounts.store(), registry, encryption, Arc::new(RevertRecoveryStrategy), audit.clone()));

        let checkouts = CheckoutManager::new(Arc::new(InMemoryRepository::new()), accounts.clone(), safes.clone(), rotation, audit);
        Harness { checkouts, accounts, safes, owner, account_id, safe_id }
    }

    #[test]
    fn request_without_approval_required_activates_immediately() {
        let h = harness(false, ApprovalPolicy::SingleApprover, vec![]);
        match h.checkouts.request(h.owner, h.account_id, "debug prod issue".into(), 30).unwrap() {
            CheckoutOutcome::Active { password, .. } => assert_eq!(password, "P"),
            CheckoutOutcome::PendingApproval { .. } => panic!("expected immediate activation"),
        }
    }

    #[test]
    fn second_request_while_one_is_active_is_rejected() {
        let h = harness(false, ApprovalPolicy::SingleApprover, vec![]);
        h.checkouts.request(h.owner, h.account_id, "r1".into(), 30).unwrap();
        assert_eq!(h.checkouts.request(h.owner, h.account_id, "r2".into(), 30), Err(UspError::InvalidState));
    }

    #[test]
    fn checkin_rotates_credential_when_configured() {
        let h = harness(false, ApprovalPolicy::SingleApprover, vec![]);
        let checkout_id = match h.checkouts.request(h.owner, h.account_id, "r".into(), 30).unwrap() {
            CheckoutOutcome::Active { checkout_id, .. } => checkout_id,
            _ => unreachable!(),
        };
        let before = h.accounts.reveal(h.owner, h.account_id).unwrap().value;
        h.checkouts.checkin(h.owner, checkout_id).unwrap();
        let after = h.accounts.reveal(h.owner, h.account_id).unwrap().value;
        assert_ne!(before, after);
        assert_eq!(h.checkouts.get(checkout_id).unwrap().state, CheckoutState::CheckedIn);
    }

    #[test]
    fn dual_control_requires_two_distinct_approvers() {
        let approver_a = UserId::new();
        let approver_b = UserId::new();
        let h = harness(true, ApprovalPolicy::DualControl, vec![approver_a, approver_b]);
        h.safes
            .update_safe(h.owner, h.safe_id, |s| {
                s.acl.insert(approver_a, SafePermission::Manage);
                s.acl.insert(approver_b, SafePermission::Manage);
            })
            .unwrap();

        let checkout_id = match h.checkouts.request(h.owner, h.account_id, "r".into(), 30).unwrap() {
            CheckoutOutcome::PendingApproval { checkout_id } => checkout_id,
            _ => panic!("expected pending approval"),
        };

        match h.checkouts.approve(approver_a, checkout_id).unwrap() {
            CheckoutOutcome::PendingApproval { .. } => {}
            CheckoutOutcome::Active { .. } => panic!("should not activate on first approval"),
        }
        match h.checkouts.approve(approver_b, checkout_id).unwrap() {
            CheckoutOutcome::Active { .. } => {}
            CheckoutOutcome::PendingApproval { .. } => panic!("should activate once dual control is satisfied"),
        }
    }
}
