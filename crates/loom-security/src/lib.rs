pub mod manager;
pub mod redact;
pub mod types;

pub use manager::SecurityManager;
pub use redact::redact_text;
pub use types::{AuditEntry, DenialReason, SecurityStats, ToolPermission, UserPermissions};
