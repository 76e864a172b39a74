//! Tamper-evident audit log (C6): append-only, hash-chained records that
//! every other component writes to.

use crate::error::{Result, UspError};
use crate::types::{now, AuditId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Actor {
    User(UserId),
    System,
    Service(String),
}

/// A single audit record, all fields except `this_hash` feeding the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: Actor,
    pub resource: String,
    pub action: String,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    pub correlation_id: Option<String>,
    pub previous_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub this_hash: Option<String>,
}

const GENESIS_SEED: &[u8] = b"usp-audit-genesis";

fn hash_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Filter criteria for `AuditLog::query`, built up with the `with_*`
/// methods; any field left `None` matches every record.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub event_type: Option<String>,
    pub resource_prefix: Option<String>,
    pub action: Option<String>,
    pub success: Option<bool>,
    pub ip_address: Option<String>,
    pub correlation_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub details_contains: Option<String>,
}

impl AuditFilter {
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_resource_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.resource_prefix = Some(prefix.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Restrict to records with `since <= timestamp <= until`.
    pub fn with_date_range(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Case-insensitive substring match against `details`.
    pub fn with_details_contains(mut self, needle: impl Into<String>) -> Self {
        self.details_contains = Some(needle.into());
        self
    }
}

pub struct NewAuditEntry {
    pub event_type: String,
    pub actor: Actor,
    pub resource: String,
    pub action: String,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    pub correlation_id: Option<String>,
}

/// Append-only, hash-chained audit log. Serializes appends through a single
/// mutex so `this_hash` chaining is never raced.
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self { records: Mutex::new(Vec::new()) }
    }

    pub fn append(&self, entry: NewAuditEntry) -> Result<AuditRecord> {
        let mut records = self.records.lock().unwrap();
        let previous_hash = records.last().map(|r| r.this_hash.clone().unwrap_or_default()).unwrap_or_else(|| hash_hex(GENESIS_SEED));

        let mut record = AuditRecord {
            id: AuditId::new(),
            timestamp: now(),
            event_type: entry.event_type,
            actor: entry.actor,
            resource: entry.resource,
            action: entry.action,
            success: entry.success,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            details: entry.details,
            correlation_id: entry.correlation_id,
            previous_hash,
            this_hash: None,
        };

        let serialized = serde_json::to_vec(&record).map_err(|e| UspError::Internal.tap_log(&e))?;
        let mut hasher = Sha256::new();
        hasher.update(record.previous_hash.as_bytes());
        hasher.update(&serialized);
        record.this_hash = Some(format!("{:x}", hasher.finalize()));

        tracing::info!(event_type = %record.event_type, resource = %record.resource, success = record.success, "audit");
        records.push(record.clone());
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filtered, paginated read. `cursor` resumes after the given record id
    /// (cursor pagination); pass `None` to start from the beginning. Still
    /// accepts a plain `offset` for callers that page by position instead.
    pub fn query(&self, filter: &AuditFilter, page_size: usize, cursor: Option<AuditId>, offset: usize) -> Result<Vec<AuditRecord>> {
        if page_size > 1000 {
            return Err(UspError::ValidationError("pageSize must be <= 1000".into()));
        }
        let records = self.records.lock().unwrap();
        let start_index = match cursor {
            Some(id) => records.iter().position(|r| r.id == id).map(|i| i + 1).unwrap_or(records.len()),
            None => 0,
        };
        let filtered: Vec<AuditRecord> = records[start_index..]
            .iter()
            .filter(|r| filter.user_id.map_or(true, |uid| matches!(r.actor, Actor::User(id) if id == uid)))
            .filter(|r| filter.event_type.as_deref().map_or(true, |et| r.event_type == et))
            .filter(|r| filter.resource_prefix.as_deref().map_or(true, |p| r.resource.starts_with(p)))
            .filter(|r| filter.action.as_deref().map_or(true, |a| r.action == a))
            .filter(|r| filter.success.map_or(true, |s| r.success == s))
            .filter(|r| filter.ip_address.as_deref().map_or(true, |ip| r.ip_address.as_deref() == Some(ip)))
            .filter(|r| filter.correlation_id.as_deref().map_or(true, |cid| r.correlation_id.as_deref() == Some(cid)))
            .filter(|r| filter.since.map_or(true, |since| r.timestamp >= since))
            .filter(|r| filter.until.map_or(true, |until| r.timestamp <= until))
            .filter(|r| {
                filter.details_contains.as_deref().map_or(true, |needle| {
                    r.details.as_deref().unwrap_or("").to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .cloned()
            .collect();
        Ok(filtered.into_iter().skip(offset).take(page_size).collect())
    }

    /// Recompute each record's hash in order; report the first mismatch.
    pub fn verify_integrity(&self) -> IntegrityResult {
        let records = self.records.lock().unwrap();
        let mut expected_previous = hash_hex(GENESIS_SEED);

        for record in records.iter() {
            if record.previous_hash != expected_previous {
                return IntegrityResult::Broken { at_record: record.id, reason: "previous_hash does not match prior record".into() };
            }

            let mut unhashed = record.clone();
            unhashed.this_hash = None;
            let serialized = match serde_json::to_vec(&unhashed) {
                Ok(s) => s,
                Err(_) => return IntegrityResult::Broken { at_record: record.id, reason: "record does not serialize".into() },
            };
            let mut hasher = Sha256::new();
            hasher.update(record.previous_hash.as_bytes());
            hasher.update(&serialized);
            let recomputed = format!("{:x}", hasher.finalize());

            if Some(&recomputed) != record.this_hash.as_ref() {
                return IntegrityResult::Broken { at_record: record.id, reason: "stored this_hash does not match recomputed hash".into() };
            }
            expected_previous = recomputed;
        }
        IntegrityResult::Ok
    }

    pub fn export_csv(&self) -> String {
        let records = self.records.lock().unwrap();
        let mut out = String::from("id,timestamp,event_type,user_id,user_name,resource,action,success,ip_address,correlation_id,details\n");
        for r in records.iter() {
            let user_id = match &r.actor {
                Actor::User(id) => id.to_string(),
                _ => String::new(),
            };
            out.push_str(&format!(
                "{},{},{},{},,{},{},{},{},{},{}\n",
                r.id,
                r.timestamp.to_rfc3339(),
                r.event_type,
                user_id,
                r.resource,
                r.action,
                r.success,
                r.ip_address.clone().unwrap_or_default(),
                r.correlation_id.clone().unwrap_or_default(),
                r.details.clone().unwrap_or_default().replace(',', ";"),
            ));
        }
        out
    }

    pub fn export_json(&self) -> String {
        let records = self.records.lock().unwrap();
        serde_json::to_string(&*records).unwrap_or_default()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityResult {
    Ok,
    Broken { at_record: AuditId, reason: String },
}

// Small helper so a serialize failure surfaces without a separate error path
// cluttering the happy-path signature above.
trait TapLog {
    fn tap_log(self, err: &dyn std::fmt::Display) -> Self;
}

impl TapLog for UspError {
    fn tap_log(self, err: &dyn std::fmt::Display) -> Self {
        tracing::error!(%err, "audit: failed to serialize record");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(event_type: &str, resource: &str) -> NewAuditEntry {
        NewAuditEntry {
            event_type: event_type.into(),
            actor: Actor::System,
            resource: resource.into(),
            action: "test".into(),
            success: true,
            ip_address: None,
            user_agent: None,
            details: None,
            correlation_id: None,
        }
    }

    #[test]
    fn untouched_log_verifies_ok() {
        let log = AuditLog::new();
        for i in 0..5 {
            log.append(entry("test.event", &format!("res:{i}"))).unwrap();
        }
        assert_eq!(log.verify_integrity(), IntegrityResult::Ok);
    }

    #[test]
    fn tampering_is_detected() {
        let log = AuditLog::new();
        log.append(entry("a", "res:1")).unwrap();
        log.append(entry("b", "res:2")).unwrap();
        log.append(entry("c", "res:3")).unwrap();

        {
            let mut records = log.records.lock().unwrap();
            records[1].action = "tampered".into();
        }

        match log.verify_integrity() {
            IntegrityResult::Broken { .. } => {}
            IntegrityResult::Ok => panic!("expected tamper detection"),
        }
    }

    #[test]
    fn chain_links_sequential_records() {
        let log = AuditLog::new();
        let r1 = log.append(entry("a", "res:1")).unwrap();
        let r2 = log.append(entry("b", "res:2")).unwrap();
        assert_eq!(r2.previous_hash, r1.this_hash.unwrap());
    }

    #[test]
    fn query_filters_by_ip_correlation_and_details() {
        let log = AuditLog::new();
        log.append(NewAuditEntry {
            event_type: "a".into(),
            actor: Actor::System,
            resource: "res:1".into(),
            action: "test".into(),
            success: true,
            ip_address: Some("10.0.0.1".into()),
            user_agent: None,
            details: Some("rotated credential for prod-db".into()),
            correlation_id: Some("corr-1".into()),
        })
        .unwrap();
        log.append(NewAuditEntry {
            event_type: "b".into(),
            actor: Actor::System,
            resource: "res:2".into(),
            action: "test".into(),
            success: true,
            ip_address: Some("10.0.0.2".into()),
            user_agent: None,
            details: Some("unrelated event".into()),
            correlation_id: Some("corr-2".into()),
        })
        .unwrap();

        let by_ip = log.query(&AuditFilter::default().with_ip_address("10.0.0.1"), 100, None, 0).unwrap();
        assert_eq!(by_ip.len(), 1);
        assert_eq!(by_ip[0].event_type, "a");

        let by_correlation = log.query(&AuditFilter::default().with_correlation_id("corr-2"), 100, None, 0).unwrap();
        assert_eq!(by_correlation.len(), 1);
        assert_eq!(by_correlation[0].event_type, "b");

        let by_details = log.query(&AuditFilter::default().with_details_contains("ROTATED"), 100, None, 0).unwrap();
        assert_eq!(by_details.len(), 1);
        assert_eq!(by_details[0].event_type, "a");
    }

    #[test]
    fn query_cursor_resumes_after_the_given_record() {
        let log = AuditLog::new();
        let r1 = log.append(entry("a", "res:1")).unwrap();
        log.append(entry("b", "res:2")).unwrap();
        log.append(entry("c", "res:3")).unwrap();

        let rest = log.query(&AuditFilter::default(), 100, Some(r1.id), 0).unwrap();
        assert_eq!(rest.iter().map(|r| r.event_type.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn query_date_range_excludes_records_outside_the_window() {
        let log = AuditLog::new();
        let r1 = log.append(entry("a", "res:1")).unwrap();
        log.append(entry("b", "res:2")).unwrap();

        let filter = AuditFilter::default().with_date_range(r1.timestamp, r1.timestamp);
        let in_range = log.query(&filter, 100, None, 0).unwrap();
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].event_type, "a");
    }
}
