//! Just-in-time access grants (C9): a time-boxed permission grant, optionally
//! sourced from a named template, optionally approval-gated, swept for
//! expiry in the background rather than checked lazily on every access.

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::error::{Result, UspError};
use crate::storage::{InMemoryRepository, Repository};
use crate::types::{now, JitGrantId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitTemplate {
    pub id: String,
    pub permission: String,
    pub default_duration_minutes: u32,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitGrantStatus {
    PendingApproval,
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone)]
pub struct JitGrant {
    pub id: JitGrantId,
    pub user_id: UserId,
    pub permission: String,
    pub template_id: Option<String>,
    pub status: JitGrantStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct JitRequest {
    pub user_id: UserId,
    pub permission: Option<String>,
    pub template_id: Option<String>,
    pub duration_minutes: Option<u32>,
}

pub struct JitManager {
    grants: Arc<InMemoryRepository<JitGrantId, JitGrant>>,
    templates: Mutex<HashMap<String, JitTemplate>>,
    audit: Arc<AuditLog>,
}

impl JitManager {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self { grants: Arc::new(InMemoryRepository::new()), templates: Mutex::new(HashMap::new()), audit }
    }

    pub fn register_template(&self, template: JitTemplate) {
        self.templates.lock().unwrap().insert(template.id.clone(), template);
    }

    pub fn request(&self, input: JitRequest) -> Result<JitGrant> {
        let (permission, duration_minutes, requires_approval) = match &input.template_id {
            Some(template_id) => {
                let templates = self.templates.lock().unwrap();
                let template = templates.get(template_id).ok_or(UspError::NotFound)?;
                (template.permission.clone(), input.duration_minutes.unwrap_or(template.default_duration_minutes), template.requires_approval)
            }
            None => {
                let permission = input.permission.clone().ok_or_else(|| UspError::ValidationError("permission or templateId is required".into()))?;
                (permission, input.duration_minutes.unwrap_or(60), false)
            }
        };

        let id = JitGrantId::new();
        let requested_at = now();
        let (status, expires_at) = if requires_approval { (JitGrantStatus::PendingApproval, None) } else { (JitGrantStatus::Active, Some(requested_at + Duration::minutes(duration_minutes as i64))) };

        let grant = JitGrant { id, user_id: input.user_id, permission, template_id: input.template_id, status, requested_at, expires_at };
        self.grants.put(id, grant.clone());
        self.audit_grant(input.user_id, id, "pam.jit.requested", true);
        Ok(grant)
    }

    pub fn approve(&self, grant_id: JitGrantId, duration_minutes: u32) -> Result<JitGrant> {
        let mut grant = self.grants.get(&grant_id).ok_or(UspError::NotFound)?;
        if grant.status != JitGrantStatus::PendingApproval {
            return Err(UspError::InvalidState);
        }
        let activated_at = now();
        grant.status = JitGrantStatus::Active;
        grant.expires_at = Some(activated_at + Duration::minutes(duration_minutes as i64));
        self.grants.put(grant_id, grant.clone());
        self.audit_grant(grant.user_id, grant_id, "pam.jit.approved", true);
        Ok(grant)
    }

    pub fn revoke(&self, grant_id: JitGrantId) -> Result<()> {
        let mut grant = self.grants.get(&grant_id).ok_or(UspError::NotFound)?;
        if matches!(grant.status, JitGrantStatus::Expired | JitGrantStatus::Revoked) {
            return Err(UspError::InvalidState);
        }
        grant.status = JitGrantStatus::Revoked;
        self.grants.put(grant_id, grant.clone());
        self.audit_grant(grant.user_id, grant_id, "pam.jit.revoked", true);
        Ok(())
    }

    /// Transition any `active` grant past its deadline to `expired`. Call
    /// periodically from a background sweep.
    pub fn expire_overdue(&self) -> Vec<JitGrantId> {
        let at = now();
        let mut expired = Vec::new();
        for mut grant in self.grants.list() {
            if grant.status == JitGrantStatus::Active && grant.expires_at.is_some_and(|deadline| deadline <= at) {
                grant.status = JitGrantStatus::Expired;
                self.grants.put(grant.id, grant.clone());
                self.audit_grant(grant.user_id, grant.id, "pam.jit.expired", true);
                expired.push(grant.id);
            }
        }
        expired
    }

    pub fn active_permissions(&self, user_id: UserId) -> Vec<String> {
        self.grants.list().into_iter().filter(|g| g.user_id == user_id && g.status == JitGrantStatus::Active).map(|g| g.permission).collect()
    }

    pub fn get(&self, grant_id: JitGrantId) -> Result<JitGrant> {
        self.grants.get(&grant_id).ok_or(UspError::NotFound)
    }

    fn audit_grant(&self, user_id: UserId, grant_id: JitGrantId, action: &str, success: bool) {
        let _ = self.audit.append(NewAuditEntry {
            event_type: action.into(),
            actor: Actor::User(user_id),
            resource: format!("jit-grants/{grant_id}"),
            action: action.into(),
            success,
            ip_address: None,
            user_agent: None,
            details: None,
            correlation_id: None,
        });
    }
}
