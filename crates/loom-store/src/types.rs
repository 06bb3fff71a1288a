use loom_core::{ConversationId, ConversationStatus, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversation owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    pub title: String,
    pub status: ConversationStatus,
    pub system_prompt: Option<String>,
    pub profile_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub workflow_config: Option<Value>,
    pub metadata: Value,
    pub message_count: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields accepted when creating a conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewConversation {
    pub title: String,
    pub system_prompt: Option<String>,
    pub profile_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub workflow_config: Option<Value>,
    pub metadata: Option<Value>,
}

/// Fields accepted by `update_conversation`. Only `Some` fields are
/// applied; `metadata` merges, the rest replace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ConversationStatus>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub workflow_config: Option<Value>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationFilters {
    pub status: Option<ConversationStatus>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub tags: Vec<String>,
    pub retrieval_enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub offset: u32,
    pub limit: u32,
}

/// Paging ceiling enforced by `list_conversations`.
pub const MAX_PAGE_LIMIT: u32 = 100;

impl Paging {
    pub fn clamped(self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.min(MAX_PAGE_LIMIT).max(1),
        }
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self { offset: 0, limit: 20 }
    }
}

/// Allowlisted sort keys — anything else maps to `UpdatedAt` to prevent
/// injection through an attacker-controlled sort column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    Title,
}

impl SortKey {
    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "created_at" => SortKey::CreatedAt,
            "updated_at" => SortKey::UpdatedAt,
            "title" => SortKey::Title,
            _ => SortKey::UpdatedAt,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Title => "title",
        }
    }
}
