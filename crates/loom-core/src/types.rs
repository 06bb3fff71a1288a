use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ids::ConversationId;

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Conversation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Paused,
    Archived,
    Deleted,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Paused => write!(f, "paused"),
            ConversationStatus::Archived => write!(f, "archived"),
            ConversationStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "paused" => Ok(ConversationStatus::Paused),
            "archived" => Ok(ConversationStatus::Archived),
            "deleted" => Ok(ConversationStatus::Deleted),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// Workflow graph shape. `Full` = rag ∧ tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Plain,
    Rag,
    Tools,
    Full,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Plain => write!(f, "plain"),
            Mode::Rag => write!(f, "rag"),
            Mode::Tools => write!(f, "tools"),
            Mode::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    /// Unknown tags default to `plain` with a warning, per the dynamic-
    /// dispatch-by-string-tag redesign: callers that need a hard error
    /// should check membership before parsing.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Mode::Plain),
            "rag" => Ok(Mode::Rag),
            "tools" => Ok(Mode::Tools),
            "full" => Ok(Mode::Full),
            other => Err(format!("unknown workflow mode: {other}")),
        }
    }
}

impl Mode {
    pub fn wants_retrieval(&self) -> bool {
        matches!(self, Mode::Rag | Mode::Full)
    }

    pub fn wants_tools(&self) -> bool {
        matches!(self, Mode::Tools | Mode::Full)
    }
}

/// Global permission level for a user, independent of any per-tool grant.
/// `Admin` short-circuits all authorization checks to allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    None,
    Read,
    Write,
    Admin,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::None => write!(f, "none"),
            PermissionLevel::Read => write!(f, "read"),
            PermissionLevel::Write => write!(f, "write"),
            PermissionLevel::Admin => write!(f, "admin"),
        }
    }
}

/// Where a workflow's shape and defaults come from. A tagged union, not a
/// struct of optional fields — this makes "template name and definition id
/// both supplied" unrepresentable, resolving the corresponding open
/// question by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkflowSource {
    Template { name: String },
    Definition { id: String },
    Dynamic { mode: Mode, config: Value },
}

/// Token/cost usage attached to a single model invocation or a whole run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub response_time_ms: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: crate::ids::MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub sequence_number: i64,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub rating: Option<f64>,
    pub rating_count: u32,
    pub error: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Agent profile type tag — a single value with a capability set rather
/// than an inheritance hierarchy of agent classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Conversational,
    TaskOriented,
    Analytical,
    Creative,
    Research,
    Support,
    Specialist,
}

/// Immutable per-run input describing how a model should be invoked.
/// Counter/performance bookkeeping lives outside the engine (see
/// DESIGN.md's open-question decision on the feedback-driven temperature
/// nudge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: crate::ids::AgentProfileId,
    pub agent_type: AgentType,
    pub system_prompt: String,
    pub tool_allowlist: Vec<String>,
    pub preferred_provider: String,
    pub fallback_providers: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

/// A message inside a running workflow. Deliberately lighter than the
/// persisted `Message` (no id, no sequence number, no rating) — it only
/// carries what a node needs to build the next provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    /// Set on a tool-role message when the call it reports on was denied
    /// or failed, so downstream nodes and persistence can distinguish a
    /// tool failure from a normal tool result without parsing `content`.
    #[serde(default)]
    pub error: bool,
}

impl ContextMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), error: false }
    }

    pub fn new_with_error(role: Role, content: impl Into<String>, error: bool) -> Self {
        Self { role, content: content.into(), error }
    }
}

/// A tool call the model asked for, not yet dispatched. Populated by the
/// Model node from the provider's response, consumed by ToolRouter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The sole mutable state threaded through a workflow run. Passed by
/// value between nodes: each node returns a new value rather than
/// mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub messages: Vec<ContextMessage>,
    pub user_id: crate::ids::UserId,
    pub conversation_id: ConversationId,
    pub retrieval_context: Option<String>,
    pub tool_call_count: u32,
    pub max_tool_calls: u32,
    pub pending_tool_calls: Vec<PendingToolCall>,
    pub metadata: serde_json::Map<String, Value>,
    pub conversation_summary: Option<String>,
    pub error_state: Option<String>,
    pub execution_history: Vec<String>,
    pub success: bool,
}

impl WorkflowContext {
    pub fn new(user_id: crate::ids::UserId, conversation_id: ConversationId) -> Self {
        Self {
            messages: Vec::new(),
            user_id,
            conversation_id,
            retrieval_context: None,
            tool_call_count: 0,
            max_tool_calls: 1,
            pending_tool_calls: Vec::new(),
            metadata: serde_json::Map::new(),
            conversation_summary: None,
            error_state: None,
            execution_history: Vec::new(),
            success: true,
        }
    }

    /// Records that `node` ran, in order, for post-hoc inspection of a
    /// completed or partial run.
    pub fn record_node(&mut self, node: &str) {
        self.execution_history.push(node.to_string());
    }

    pub fn last_assistant_message(&self) -> Option<&ContextMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ConversationId, UserId};

    #[test]
    fn new_context_has_no_system_message() {
        let ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        assert!(!ctx.has_system_message());
        assert!(ctx.last_assistant_message().is_none());
    }

    #[test]
    fn last_assistant_message_skips_trailing_tool_messages() {
        let mut ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        ctx.messages.push(ContextMessage::new(Role::User, "hi"));
        ctx.messages.push(ContextMessage::new(Role::Assistant, "calling a tool"));
        ctx.messages.push(ContextMessage::new(Role::Tool, "tool result"));
        let last = ctx.last_assistant_message().unwrap();
        assert_eq!(last.content, "calling a tool");
    }
}
