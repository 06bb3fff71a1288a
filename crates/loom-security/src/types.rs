use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use loom_core::{AuditId, PermissionLevel, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an authorization attempt was denied. Carried alongside the audit
/// entry rather than as a `LoomError` variant — spec treats a rate-limited
/// tool call as "an authorization denial" the ToolRouter turns into an
/// error tool-role message, not a run-terminating error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    InsufficientPermissions,
    RateLimitExceeded,
    SensitiveContentDetected,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::InsufficientPermissions => "insufficient_permissions",
            DenialReason::RateLimitExceeded => "rate_limit_exceeded",
            DenialReason::SensitiveContentDetected => "sensitive_content_detected",
        }
    }
}

/// A grant of access to one tool for one user.
#[derive(Debug, Clone)]
pub struct ToolPermission {
    pub tool_name: String,
    pub level: PermissionLevel,
    pub allowed_methods: HashSet<String>,
    pub rate_limit: Option<u32>,
    pub expiry: Option<DateTime<Utc>>,
    pub usage_count: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolPermission {
    pub fn new(tool_name: impl Into<String>, level: PermissionLevel) -> Self {
        Self {
            tool_name: tool_name.into(),
            level,
            allowed_methods: HashSet::new(),
            rate_limit: None,
            expiry: None,
            usage_count: 0,
            last_used: None,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|exp| now < exp).unwrap_or(true)
    }

    pub fn can_execute(&self, method: Option<&str>, now: DateTime<Utc>) -> bool {
        if !self.is_valid(now) {
            return false;
        }
        if self.level == PermissionLevel::None {
            return false;
        }
        if let Some(m) = method {
            if !self.allowed_methods.is_empty() && !self.allowed_methods.contains(m) {
                return false;
            }
        }
        true
    }

    /// Hourly sliding window anchored on `last_used`. A denial leaves
    /// `usage_count`/`last_used` untouched — only a successful record
    /// advances state.
    pub fn record_usage(&mut self, now: DateTime<Utc>) -> bool {
        if let (Some(limit), Some(last_used)) = (self.rate_limit, self.last_used) {
            let elapsed = now.signed_duration_since(last_used);
            if elapsed < chrono::Duration::hours(1) {
                if self.usage_count >= limit {
                    return false;
                }
            } else {
                self.usage_count = 0;
            }
        }
        self.usage_count += 1;
        self.last_used = Some(now);
        true
    }
}

/// Per-user container of tool grants plus a global level that can
/// short-circuit every per-tool check (`Admin`).
#[derive(Debug, Clone)]
pub struct UserPermissions {
    pub user_id: UserId,
    pub tool_permissions: HashMap<String, ToolPermission>,
    pub global_permission: PermissionLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPermissions {
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            tool_permissions: HashMap::new(),
            global_permission: PermissionLevel::None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_tool_permission(&mut self, permission: ToolPermission) {
        self.tool_permissions.insert(permission.tool_name.clone(), permission);
        self.updated_at = Utc::now();
    }

    pub fn remove_tool_permission(&mut self, tool_name: &str) -> bool {
        let removed = self.tool_permissions.remove(tool_name).is_some();
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn can_use_tool(&self, tool_name: &str, method: Option<&str>, now: DateTime<Utc>) -> bool {
        if self.global_permission == PermissionLevel::Admin {
            return true;
        }
        self.tool_permissions
            .get(tool_name)
            .map(|p| p.can_execute(method, now))
            .unwrap_or(false)
    }

    pub fn record_tool_usage(&mut self, tool_name: &str, now: DateTime<Utc>) -> bool {
        match self.tool_permissions.get_mut(tool_name) {
            Some(permission) => permission.record_usage(now),
            None => false,
        }
    }
}

/// Append-only audit record. Bounded FIFO at the manager level, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub event_type: String,
    pub user_id: UserId,
    pub workflow_id: String,
    pub workflow_mode: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityStats {
    pub total_events: usize,
    pub denied_attempts: usize,
    pub authorized_executions: usize,
    pub top_users: Vec<(UserId, usize)>,
    pub top_events: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_with_no_expiry_is_always_valid() {
        let perm = ToolPermission::new("calculator", PermissionLevel::Read);
        assert!(perm.is_valid(Utc::now()));
    }

    #[test]
    fn expired_permission_is_invalid() {
        let mut perm = ToolPermission::new("calculator", PermissionLevel::Read);
        perm.expiry = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!perm.is_valid(Utc::now()));
        assert!(!perm.can_execute(None, Utc::now()));
    }

    #[test]
    fn none_level_cannot_execute() {
        let perm = ToolPermission::new("calculator", PermissionLevel::None);
        assert!(!perm.can_execute(None, Utc::now()));
    }

    #[test]
    fn method_allowlist_restricts_execution() {
        let mut perm = ToolPermission::new("calculator", PermissionLevel::Write);
        perm.allowed_methods.insert("add".to_string());
        assert!(perm.can_execute(Some("add"), Utc::now()));
        assert!(!perm.can_execute(Some("subtract"), Utc::now()));
    }

    #[test]
    fn rate_limit_denies_after_threshold_within_window() {
        let mut perm = ToolPermission::new("calculator", PermissionLevel::Read);
        perm.rate_limit = Some(2);
        let t0 = Utc::now();
        assert!(perm.record_usage(t0));
        assert!(perm.record_usage(t0 + chrono::Duration::minutes(5)));
        assert!(!perm.record_usage(t0 + chrono::Duration::minutes(10)));
        // denial doesn't advance state
        assert_eq!(perm.usage_count, 2);
    }

    #[test]
    fn rate_limit_resets_after_window_elapses() {
        let mut perm = ToolPermission::new("calculator", PermissionLevel::Read);
        perm.rate_limit = Some(2);
        let t0 = Utc::now();
        assert!(perm.record_usage(t0));
        assert!(perm.record_usage(t0 + chrono::Duration::minutes(5)));
        assert!(!perm.record_usage(t0 + chrono::Duration::minutes(10)));
        // window anchors on the last successful call (t0 + 5m), not t0
        assert!(perm.record_usage(t0 + chrono::Duration::minutes(66)));
    }

    #[test]
    fn admin_global_permission_bypasses_per_tool_check() {
        let mut perms = UserPermissions::new(UserId::new());
        perms.global_permission = PermissionLevel::Admin;
        assert!(perms.can_use_tool("anything", None, Utc::now()));
    }

    #[test]
    fn unknown_tool_is_denied_without_admin() {
        let perms = UserPermissions::new(UserId::new());
        assert!(!perms.can_use_tool("calculator", None, Utc::now()));
    }
}
