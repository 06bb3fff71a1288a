use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use loom_core::{AuditId, PermissionLevel, UserId};
use serde_json::Value;
use tracing::instrument;

use crate::types::{AuditEntry, DenialReason, SecurityStats, ToolPermission, UserPermissions};

struct SecurityState {
    permissions: HashMap<UserId, UserPermissions>,
    audit_log: VecDeque<AuditEntry>,
}

/// Authorization pipeline for tool calls plus the append-only audit log.
/// An owned, injectable value rather than a module-level singleton, per
/// the "Global singleton managers" redesign flag — one instance lives on
/// `ChatOrchestrator` and is shared via `Arc` with the builder/executor.
pub struct SecurityManager {
    state: Mutex<SecurityState>,
    audit_capacity: usize,
    blocklist: Vec<String>,
}

impl SecurityManager {
    pub fn new(audit_capacity: usize, blocklist: Vec<String>) -> Self {
        Self {
            state: Mutex::new(SecurityState {
                permissions: HashMap::new(),
                audit_log: VecDeque::new(),
            }),
            audit_capacity: audit_capacity.max(1),
            blocklist: blocklist.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    #[instrument(skip(self, allowed_methods))]
    pub fn grant_tool_permission(
        &self,
        user: &UserId,
        tool_name: &str,
        level: PermissionLevel,
        allowed_methods: Vec<String>,
        rate_limit: Option<u32>,
        expiry: Option<DateTime<Utc>>,
    ) {
        let mut permission = ToolPermission::new(tool_name, level);
        permission.allowed_methods = allowed_methods.into_iter().collect();
        permission.rate_limit = rate_limit;
        permission.expiry = expiry;

        let mut state = self.state.lock().expect("security manager poisoned");
        state
            .permissions
            .entry(user.clone())
            .or_insert_with(|| UserPermissions::new(user.clone()))
            .add_tool_permission(permission);

        let details = serde_json::json!({
            "tool_name": tool_name,
            "permission_level": level.to_string(),
            "rate_limit": rate_limit,
        });
        push_event(&mut state.audit_log, self.audit_capacity, "permission_granted", user, "", "security", details);
    }

    #[instrument(skip(self))]
    pub fn revoke_tool_permission(&self, user: &UserId, tool_name: &str) -> bool {
        let mut state = self.state.lock().expect("security manager poisoned");
        let revoked = state
            .permissions
            .get_mut(user)
            .map(|p| p.remove_tool_permission(tool_name))
            .unwrap_or(false);

        if revoked {
            let details = serde_json::json!({ "tool_name": tool_name });
            push_event(&mut state.audit_log, self.audit_capacity, "permission_revoked", user, "", "security", details);
        }
        revoked
    }

    pub fn set_global_permission(&self, user: &UserId, level: PermissionLevel) {
        let mut state = self.state.lock().expect("security manager poisoned");
        state
            .permissions
            .entry(user.clone())
            .or_insert_with(|| UserPermissions::new(user.clone()))
            .global_permission = level;
    }

    /// The three-step authorization pipeline: permission check, rate
    /// limit, content filter. Each failure writes its own audit entry
    /// with the matching `reason`; success writes one more.
    #[instrument(skip(self, parameters))]
    pub fn authorize_tool_execution(
        &self,
        user: &UserId,
        workflow_id: &str,
        workflow_mode: &str,
        tool_name: &str,
        method: Option<&str>,
        parameters: Option<&Value>,
    ) -> Result<(), DenialReason> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("security manager poisoned");

        let can_use = state
            .permissions
            .get(user)
            .map(|p| p.can_use_tool(tool_name, method, now))
            .unwrap_or(false);

        if !can_use {
            let details = serde_json::json!({
                "tool_name": tool_name, "method": method,
                "reason": DenialReason::InsufficientPermissions.as_str(),
            });
            push_event(&mut state.audit_log, self.audit_capacity, "tool_access_denied", user, workflow_id, workflow_mode, details);
            return Err(DenialReason::InsufficientPermissions);
        }

        // Admin users have no per-tool permission record to rate-limit
        // against; only record usage when a concrete grant exists.
        let is_admin = state
            .permissions
            .get(user)
            .map(|p| p.global_permission == PermissionLevel::Admin)
            .unwrap_or(false);
        if !is_admin {
            let within_limit = state
                .permissions
                .get_mut(user)
                .map(|p| p.record_tool_usage(tool_name, now))
                .unwrap_or(true);
            if !within_limit {
                let details = serde_json::json!({
                    "tool_name": tool_name, "method": method,
                    "reason": DenialReason::RateLimitExceeded.as_str(),
                });
                push_event(&mut state.audit_log, self.audit_capacity, "tool_access_denied", user, workflow_id, workflow_mode, details);
                return Err(DenialReason::RateLimitExceeded);
            }
        }

        if let Some(params) = parameters {
            if self.contains_sensitive_content(params) {
                let details = serde_json::json!({
                    "tool_name": tool_name, "method": method,
                    "reason": DenialReason::SensitiveContentDetected.as_str(),
                });
                push_event(&mut state.audit_log, self.audit_capacity, "tool_access_denied", user, workflow_id, workflow_mode, details);
                return Err(DenialReason::SensitiveContentDetected);
            }
        }

        let details = serde_json::json!({ "tool_name": tool_name, "method": method });
        push_event(&mut state.audit_log, self.audit_capacity, "tool_execution_authorized", user, workflow_id, workflow_mode, details);
        Ok(())
    }

    /// Read-only authorization check for build-time tool filtering: does
    /// this user's current grants permit referencing this tool at all.
    /// Unlike `authorize_tool_execution` this never records usage or
    /// writes an audit entry — it answers "could this call ever succeed",
    /// not "allow this specific call", so it's safe to call once per
    /// candidate tool while assembling a workflow's tool list.
    pub fn can_use_tool(&self, user: &UserId, tool_name: &str) -> bool {
        let state = self.state.lock().expect("security manager poisoned");
        state
            .permissions
            .get(user)
            .map(|p| p.can_use_tool(tool_name, None, Utc::now()))
            .unwrap_or(false)
    }

    /// Case-insensitive substring match against the configured blocklist.
    /// Objects are JSON-stringified, arrays are space-joined, everything
    /// else is stringified directly.
    pub fn contains_sensitive_content(&self, data: &Value) -> bool {
        let text = match data {
            Value::Object(_) => data.to_string().to_lowercase(),
            Value::Array(items) => items
                .iter()
                .map(value_to_plain)
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
            other => value_to_plain(other).to_lowercase(),
        };
        self.blocklist.iter().any(|pattern| text.contains(pattern.as_str()))
    }

    /// Redacts blocklisted values out of free-form text before it reaches
    /// a log line, sharing the same blocklist as `contains_sensitive_content`.
    pub fn redact(&self, text: &str) -> String {
        crate::redact::redact_text(&self.blocklist, text)
    }

    pub fn get_audit_log(
        &self,
        user: Option<&UserId>,
        event_type: Option<&str>,
        hours: i64,
        limit: usize,
    ) -> Vec<AuditEntry> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let state = self.state.lock().expect("security manager poisoned");
        state
            .audit_log
            .iter()
            .rev()
            .filter(|e| e.timestamp > cutoff)
            .filter(|e| user.map(|u| &e.user_id == u).unwrap_or(true))
            .filter(|e| event_type.map(|t| e.event_type == t).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_security_stats(&self, hours: i64) -> SecurityStats {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let state = self.state.lock().expect("security manager poisoned");
        let recent: Vec<&AuditEntry> = state.audit_log.iter().filter(|e| e.timestamp > cutoff).collect();

        if recent.is_empty() {
            return SecurityStats::default();
        }

        let mut event_counts: HashMap<String, usize> = HashMap::new();
        let mut user_counts: HashMap<UserId, usize> = HashMap::new();
        for entry in &recent {
            *event_counts.entry(entry.event_type.clone()).or_insert(0) += 1;
            *user_counts.entry(entry.user_id.clone()).or_insert(0) += 1;
        }

        let denied_attempts = event_counts
            .iter()
            .filter(|(event, _)| event.contains("denied"))
            .map(|(_, count)| *count)
            .sum();
        let authorized_executions = event_counts.get("tool_execution_authorized").copied().unwrap_or(0);

        let mut top_users: Vec<(UserId, usize)> = user_counts.into_iter().collect();
        top_users.sort_by(|a, b| b.1.cmp(&a.1));
        top_users.truncate(5);

        let mut top_events: Vec<(String, usize)> = event_counts.into_iter().collect();
        top_events.sort_by(|a, b| b.1.cmp(&a.1));
        top_events.truncate(5);

        SecurityStats {
            total_events: recent.len(),
            denied_attempts,
            authorized_executions,
            top_users,
            top_events,
        }
    }
}

fn value_to_plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_event(
    log: &mut VecDeque<AuditEntry>,
    capacity: usize,
    event_type: &str,
    user: &UserId,
    workflow_id: &str,
    workflow_mode: &str,
    details: Value,
) {
    log.push_back(AuditEntry {
        id: AuditId::new(),
        event_type: event_type.to_string(),
        user_id: user.clone(),
        workflow_id: workflow_id.to_string(),
        workflow_mode: workflow_mode.to_string(),
        details,
        timestamp: Utc::now(),
    });
    while log.len() > capacity {
        log.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist() -> Vec<String> {
        vec!["password".into(), "api_key".into(), "secret_key".into(), "token".into()]
    }

    #[test]
    fn denied_without_grant_writes_audit_entry() {
        let manager = SecurityManager::new(100, blocklist());
        let user = UserId::new();
        let err = manager
            .authorize_tool_execution(&user, "wf1", "tools", "file_manager", None, None)
            .unwrap_err();
        assert_eq!(err, DenialReason::InsufficientPermissions);

        let log = manager.get_audit_log(Some(&user), Some("tool_access_denied"), 24, 10);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].details["reason"], "insufficient_permissions");
    }

    #[test]
    fn granted_permission_authorizes_execution() {
        let manager = SecurityManager::new(100, blocklist());
        let user = UserId::new();
        manager.grant_tool_permission(&user, "calculator", PermissionLevel::Write, vec![], None, None);
        manager
            .authorize_tool_execution(&user, "wf1", "tools", "calculator", None, None)
            .unwrap();

        let log = manager.get_audit_log(Some(&user), Some("tool_execution_authorized"), 24, 10);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn rate_limited_tool_denies_third_call_within_hour() {
        let manager = SecurityManager::new(100, blocklist());
        let user = UserId::new();
        manager.grant_tool_permission(&user, "calculator", PermissionLevel::Write, vec![], Some(2), None);

        manager.authorize_tool_execution(&user, "wf1", "tools", "calculator", None, None).unwrap();
        manager.authorize_tool_execution(&user, "wf1", "tools", "calculator", None, None).unwrap();
        let err = manager
            .authorize_tool_execution(&user, "wf1", "tools", "calculator", None, None)
            .unwrap_err();
        assert_eq!(err, DenialReason::RateLimitExceeded);
    }

    #[test]
    fn admin_global_permission_bypasses_rate_limit() {
        let manager = SecurityManager::new(100, blocklist());
        let user = UserId::new();
        manager.set_global_permission(&user, PermissionLevel::Admin);
        for _ in 0..10 {
            manager
                .authorize_tool_execution(&user, "wf1", "tools", "anything", None, None)
                .unwrap();
        }
    }

    #[test]
    fn sensitive_parameters_are_denied() {
        let manager = SecurityManager::new(100, blocklist());
        let user = UserId::new();
        manager.grant_tool_permission(&user, "echo", PermissionLevel::Write, vec![], None, None);
        let params = serde_json::json!({ "value": "my api_key is 123" });
        let err = manager
            .authorize_tool_execution(&user, "wf1", "tools", "echo", None, Some(&params))
            .unwrap_err();
        assert_eq!(err, DenialReason::SensitiveContentDetected);
    }

    #[test]
    fn audit_log_evicts_oldest_entry_past_capacity() {
        let manager = SecurityManager::new(2, blocklist());
        let user = UserId::new();
        manager.grant_tool_permission(&user, "a", PermissionLevel::Read, vec![], None, None);
        manager.grant_tool_permission(&user, "b", PermissionLevel::Read, vec![], None, None);
        manager.grant_tool_permission(&user, "c", PermissionLevel::Read, vec![], None, None);

        let log = manager.get_audit_log(Some(&user), None, 24, 10);
        assert_eq!(log.len(), 2);
    }
}
