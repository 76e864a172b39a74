//! Privileged session recording (C9): every command run during a checkout
//! is captured with a strictly increasing sequence number, flagged for
//! suspicious activity by keyword, and played back by timeline, single
//! frame, full-text search, or export.

use crate::audit::{Actor, AuditLog, NewAuditEntry};
use crate::types::{now, CheckoutId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommand {
    pub checkout_id: CheckoutId,
    pub sequence_number: u64,
    pub command_text: String,
    pub executed_at: DateTime<Utc>,
    pub suspicious: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Html,
    Text,
}

/// Commands matching any of these (case-insensitively) mark the recorded
/// command `suspicious`. A production deployment would source this list
/// from configuration rather than a fixed default.
const DEFAULT_SUSPICIOUS_PATTERNS: &[&str] = &["drop table", "drop database", "shutdown", "rm -rf", "grant all", "truncate"];

pub struct SessionRecorder {
    commands: Mutex<HashMap<CheckoutId, Vec<SessionCommand>>>,
    suspicious_patterns: Vec<String>,
    audit: Arc<AuditLog>,
}

impl SessionRecorder {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self { commands: Mutex::new(HashMap::new()), suspicious_patterns: DEFAULT_SUSPICIOUS_PATTERNS.iter().map(|s| s.to_string()).collect(), audit }
    }

    pub fn with_patterns(audit: Arc<AuditLog>, suspicious_patterns: Vec<String>) -> Self {
        Self { commands: Mutex::new(HashMap::new()), suspicious_patterns, audit }
    }

    fn is_suspicious(&self, command_text: &str) -> bool {
        let lower = command_text.to_lowercase();
        self.suspicious_patterns.iter().any(|pattern| lower.contains(pattern.as_str()))
    }

    pub fn record(&self, actor: UserId, checkout_id: CheckoutId, command_text: &str) -> SessionCommand {
        let command = {
            let mut commands = self.commands.lock().unwrap();
            let entries = commands.entry(checkout_id).or_default();
            let sequence_number = entries.len() as u64 + 1;
            let command = SessionCommand { checkout_id, sequence_number, command_text: command_text.to_string(), executed_at: now(), suspicious: self.is_suspicious(command_text) };
            entries.push(command.clone());
            command
        };
        let _ = self.audit.append(NewAuditEntry {
            event_type: "pam.session.command".into(),
            actor: Actor::User(actor),
            resource: format!("checkouts/{checkout_id}"),
            action: "command".into(),
            success: true,
            ip_address: None,
            user_agent: None,
            details: Some(command.command_text.clone()),
            correlation_id: None,
        });
        command
    }

    pub fn timeline(&self, checkout_id: CheckoutId) -> Vec<SessionCommand> {
        self.commands.lock().unwrap().get(&checkout_id).cloned().unwrap_or_default()
    }

    pub fn frame_at(&self, checkout_id: CheckoutId, sequence_number: u64) -> Option<SessionCommand> {
        self.timeline(checkout_id).into_iter().find(|c| c.sequence_number == sequence_number)
    }

    pub fn search(&self, checkout_id: CheckoutId, needle: &str) -> Vec<SessionCommand> {
        let needle = needle.to_lowercase();
        self.timeline(checkout_id).into_iter().filter(|c| c.command_text.to_lowercase().contains(&needle)).collect()
    }

    pub fn has_suspicious_activity(&self, checkout_id: CheckoutId) -> bool {
        self.timeline(checkout_id).iter().any(|c| c.suspicious)
    }

    pub fn export(&self, checkout_id: CheckoutId, format: ExportFormat) -> String {
        let commands = self.timeline(checkout_id);
        match format {
            ExportFormat::Json => serde_json::to_string(&commands).unwrap_or_default(),
            ExportFormat::Csv => {
                let mut out = String::from("sequence_number,executed_at,suspicious,command_text\n");
                for c in &commands {
                    out.push_str(&format!("{},{},{},{}\n", c.sequence_number, c.executed_at.to_rfc3339(), c.suspicious, c.command_text.replace(',', ";")));
                }
                out
            }
            ExportFormat::Html => {
                let mut out = String::from("<table>\n<tr><th>#</th><th>time</th><th>command</th></tr>\n");
                for c in &commands {
                    let row_class = if c.suspicious { " class=\"suspicious\"" } else { "" };
                    out.push_str(&format!("<tr{}><td>{}</td><td>{}</td><td>{}</td></tr>\n", row_class, c.sequence_number, c.executed_at.to_rfc3339(), html_escape(&c.command_text)));
                }
                out.push_str("</table>\n");
                out
            }
            ExportFormat::Text => commands.iter().map(|c| format!("[{}] {} {}", c.sequence_number, c.executed_at.to_rfc3339(), c.command_text)).collect::<Vec<_>>().join("\n"),
        }
    }
}

fn html_escape(input: &str) -> String {
    input.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> SessionRecorder {
        SessionRecorder::new(Arc::new(AuditLog::new()))
    }

    #[test]
    fn sequence_numbers_increase_strictly_per_checkout() {
        let recorder = recorder();
        let actor = UserId::new();
        let checkout_id = CheckoutId::new();
        let c1 = recorder.record(actor, checkout_id, "select 1");
        let c2 = recorder.record(actor, checkout_id, "select 2");
        assert_eq!(c1.sequence_number, 1);
        assert_eq!(c2.sequence_number, 2);
    }

    #[test]
    fn suspicious_keyword_flags_command() {
        let recorder = recorder();
        let actor = UserId::new();
        let checkout_id = CheckoutId::new();
        recorder.record(actor, checkout_id, "select * from users");
        recorder.record(actor, checkout_id, "DROP TABLE users");
        assert!(recorder.has_suspicious_activity(checkout_id));
        assert!(!recorder.frame_at(checkout_id, 1).unwrap().suspicious);
        assert!(recorder.frame_at(checkout_id, 2).unwrap().suspicious);
    }

    #[test]
    fn search_matches_case_insensitively() {
        let recorder = recorder();
        let actor = UserId::new();
        let checkout_id = CheckoutId::new();
        recorder.record(actor, checkout_id, "SELECT * FROM accounts");
        assert_eq!(recorder.search(checkout_id, "select").len(), 1);
        assert_eq!(recorder.search(checkout_id, "insert").len(), 0);
    }

    #[test]
    fn export_formats_include_every_command() {
        let recorder = recorder();
        let actor = UserId::new();
        let checkout_id = CheckoutId::new();
        recorder.record(actor, checkout_id, "select 1");
        recorder.record(actor, checkout_id, "select 2");
        assert_eq!(recorder.export(checkout_id, ExportFormat::Csv).lines().count(), 3);
        assert_eq!(recorder.export(checkout_id, ExportFormat::Text).lines().count(), 2);
    }

    #[test]
    fn recording_a_command_appends_an_audit_entry() {
        let audit = Arc::new(AuditLog::new());
        let recorder = SessionRecorder::new(audit.clone());
        recorder.record(UserId::new(), CheckoutId::new(), "select 1");
        assert_eq!(audit.len(), 1);
    }
}
