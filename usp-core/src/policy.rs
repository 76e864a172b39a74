//! Policy & RBAC (C10): effective permissions are the union of every
//! assigned role's permissions, then filtered by a small set of
//! `AccessPolicy` documents evaluated as a pure function of
//! `(permissions, resource, action, risk_score)`. Deny always wins.
//!
//! The verdict-enum-plus-pure-`evaluate()` shape mirrors this codebase's
//! existing key-rotation trigger evaluator; the content here is generalized
//! from "should this key rotate" to "is this actor allowed to do this".

use crate::types::{PermissionId, PolicyId, RoleId};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub permissions: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Effect {
    Allow,
    RequireStepUp,
    Deny,
}

#[derive(Debug, Clone)]
pub enum PolicyCondition {
    Always,
    /// Only applies once the caller's assessed risk score is at or above
    /// this threshold (0..100).
    RiskAtLeast(u32),
}

/// A small, pure-evaluation access policy: an effect that applies when a
/// resource glob and an action both match, optionally gated by a condition.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub id: PolicyId,
    pub name: String,
    pub effect: Effect,
    /// A resource pattern: either an exact path or a `prefix*` glob.
    pub resource_pattern: String,
    pub actions: HashSet<String>,
    pub condition: PolicyCondition,
}

impl AccessPolicy {
    fn matches(&self, resource: &str, action: &str, risk_score: Option<u32>) -> bool {
        if !self.actions.contains(action) && !self.actions.contains("*") {
            return false;
        }
        if !pattern_matches(&self.resource_pattern, resource) {
            return false;
        }
        match self.condition {
            PolicyCondition::Always => true,
            PolicyCondition::RiskAtLeast(threshold) => risk_score.is_some_and(|s| s >= threshold),
        }
    }
}

fn pattern_matches(pattern: &str, resource: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => resource.starts_with(prefix),
        None => pattern == resource,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    RequireStepUp,
    Deny,
}

/// Union every role's permission set.
pub fn effective_permissions<'a>(roles: impl IntoIterator<Item = &'a Role>) -> HashSet<String> {
    let mut permissions = HashSet::new();
    for role in roles {
        permissions.extend(role.permissions.iter().cloned());
    }
    permissions
}

fn permission_grants(permissions: &HashSet<String>, resource: &str, action: &str) -> bool {
    permissions.iter().any(|p| match p.split_once(':') {
        Some((perm_action, perm_resource)) => (perm_action == action || perm_action == "*") && pattern_matches(perm_resource, resource),
        None => false,
    })
}

/// Pure evaluation: no permission grant is an implicit deny; policies layer
/// on top and a `Deny` effect always wins regardless of ordering.
pub fn evaluate(permissions: &HashSet<String>, policies: &[AccessPolicy], resource: &str, action: &str, risk_score: Option<u32>) -> PolicyVerdict {
    if !permission_grants(permissions, resource, action) {
        return PolicyVerdict::Deny;
    }

    let mut verdict = PolicyVerdict::Allow;
    for policy in policies {
        if !policy.matches(resource, action, risk_score) {
            continue;
        }
        match policy.effect {
            Effect::Deny => return PolicyVerdict::Deny,
            Effect::RequireStepUp => verdict = PolicyVerdict::RequireStepUp,
            Effect::Allow => {}
        }
    }
    verdict
}
