//! Safe CRUD with ACL-based authorization (C8). A safe owns a set of
//! accounts (by id only — no back-pointers, per the ownership-root pattern
//! this codebase uses for key metadata elsewhere) and carries the rotation
//! and checkout policy every account under it inherits.

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::error::{Result, UspError};
use crate::pam::checkout::ApprovalPolicy;
use crate::storage::{InMemoryRepository, Repository};
use crate::types::{SafeId, UserId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SafePermission {
    Read,
    Write,
    Manage,
}

#[derive(Debug, Clone)]
pub struct Safe {
    pub id: SafeId,
    pub name: String,
    pub owner_id: UserId,
    pub acl: HashMap<UserId, SafePermission>,
    pub rotation_interval_days: i64,
    pub max_checkout_duration_minutes: u32,
    pub requires_approval: bool,
    pub approval_policy: ApprovalPolicy,
    pub approvers: Vec<UserId>,
    pub rotate_on_checkin: bool,
}

pub struct NewSafe {
    pub name: String,
    pub owner_id: UserId,
    pub rotation_interval_days: i64,
    pub max_checkout_duration_minutes: u32,
    pub requires_approval: bool,
    pub approval_policy: ApprovalPolicy,
    pub approvers: Vec<UserId>,
    pub rotate_on_checkin: bool,
}

pub type SafeStore = Arc<InMemoryRepository<SafeId, Safe>>;

pub struct SafeManager {
    safes: SafeStore,
    audit: Arc<AuditLog>,
}

impl SafeManager {
    pub fn new(safes: SafeStore, audit: Arc<AuditLog>) -> Self {
        Self { safes, audit }
    }

    pub fn store(&self) -> SafeStore {
        self.safes.clone()
    }

    pub fn create_safe(&self, input: NewSafe) -> Result<SafeId> {
        let id = SafeId::new();
        let owner_id = input.owner_id;
        self.safes.put(
            id,
            Safe {
                id,
                name: input.name,
                owner_id: input.owner_id,
                acl: HashMap::new(),
                rotation_interval_days: input.rotation_interval_days,
                max_checkout_duration_minutes: input.max_checkout_duration_minutes,
                requires_approval: input.requires_approval,
                approval_policy: input.approval_policy,
                approvers: input.approvers,
                rotate_on_checkin: input.rotate_on_checkin,
            },
        );
        self.audit_safe(owner_id, id, "safe.create", true);
        Ok(id)
    }

    pub fn get(&self, safe_id: SafeId) -> Result<Safe> {
        self.safes.get(&safe_id).ok_or(UspError::NotFound)
    }

    pub fn update_safe(&self, actor: UserId, safe_id: SafeId, mutate: impl FnOnce(&mut Safe)) -> Result<()> {
        let mut safe = self.get(safe_id)?;
        self.authorize(&safe, actor, SafePermission::Manage)?;
        mutate(&mut safe);
        self.safes.put(safe_id, safe);
        self.audit_safe(actor, safe_id, "safe.update", true);
        Ok(())
    }

    pub fn delete_safe(&self, actor: UserId, safe_id: SafeId) -> Result<()> {
        let safe = self.get(safe_id)?;
        self.authorize(&safe, actor, SafePermission::Manage)?;
        self.safes.delete(&safe_id);
        self.audit_safe(actor, safe_id, "safe.delete", true);
        Ok(())
    }

    pub fn list_safes(&self, actor: UserId) -> Vec<Safe> {
        self.safes.list().into_iter().filter(|s| s.owner_id == actor || s.acl.contains_key(&actor)).collect()
    }

    pub fn authorize(&self, safe: &Safe, actor: UserId, required: SafePermission) -> Result<()> {
        if safe.owner_id == actor {
            return Ok(());
        }
        match safe.acl.get(&actor) {
            Some(granted) if *granted >= required => Ok(()),
            _ => Err(UspError::Forbidden),
        }
    }

    fn audit_safe(&self, actor: UserId, safe_id: SafeId, action: &str, success: bool) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: action.into(),
            actor: Actor::User(actor),
            resource: format!("safes/{safe_id}"),
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

    fn manager() -> SafeManager {
        SafeManager::new(Arc::new(InMemoryRepository::new()), Arc::new(AuditLog::new()))
    }

    fn new_safe(owner: UserId) -> NewSafe {
        NewSafe {
            name: "prod-db".into(),
            owner_id: owner,
            rotation_interval_days: 30,
            max_checkout_duration_minutes: 60,
            requires_approval: false,
            approval_policy: ApprovalPolicy::SingleApprover,
            approvers: vec![],
            rotate_on_checkin: true,
        }
    }

    #[test]
    fn owner_can_manage_without_explicit_acl_entry() {
        let mgr = manager();
        let owner = UserId::new();
        let id = mgr.create_safe(new_safe(owner)).unwrap();
        assert!(mgr.update_safe(owner, id, |s| s.rotation_interval_days = 7).is_ok());
    }

    #[test]
    fn non_acl_user_is_forbidden() {
        let mgr = manager();
        let owner = UserId::new();
        let stranger = UserId::new();
        let id = mgr.create_safe(new_safe(owner)).unwrap();
        assert_eq!(mgr.update_safe(stranger, id, |_| {}), Err(UspError::Forbidden));
    }

    #[test]
    fn read_only_acl_cannot_manage() {
        let mgr = manager();
        let owner = UserId::new();
        let viewer = UserId::new();
        let id = mgr.create_safe(new_safe(owner)).unwrap();
        mgr.update_safe(owner, id, |s| {
            s.acl.insert(viewer, SafePermission::Read);
        })
        .unwrap();
        assert_eq!(mgr.update_safe(viewer, id, |_| {}), Err(UspError::Forbidden));
    }
}
