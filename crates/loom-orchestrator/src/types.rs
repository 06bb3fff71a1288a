use serde::{Deserialize, Serialize};

use loom_core::{ConversationId, MessageId, Usage, WorkflowSource};

/// Per-call overrides layered over conversation/profile defaults. Every
/// field is optional: `None` means "fall through to the next source in
/// the precedence chain" (request override > conversation preference >
/// configured default > first available).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOverrides {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub provider: Option<String>,
}

/// Input to one chat invocation, carried over any transport: an abstract
/// request shape expressed as a plain Rust type since HTTP/CLI surfaces
/// are out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInvocation {
    pub conversation_id: Option<ConversationId>,
    pub message: String,
    pub workflow_source: WorkflowSource,
    #[serde(default)]
    pub overrides: ChatOverrides,
    /// Accepted for API-shape compatibility but not read by the
    /// orchestrator: graph shape is driven entirely by
    /// `workflow_source`'s `mode` (a `rag`/`full` mode already wires in
    /// the retriever; a `plain`/`rag` mode has no tool router to enable).
    #[serde(default)]
    pub enable_retrieval: bool,
    /// See `enable_retrieval` — same accepted-but-inert status; `mode`
    /// alone decides whether the tool router is present.
    #[serde(default)]
    pub enable_tools: bool,
    #[serde(default)]
    pub enable_memory: bool,
    pub allowed_tools: Option<Vec<String>>,
    /// Which registered retriever to bind into a rag/full workflow. The
    /// engine has no notion of "the" retriever — `ChatOrchestrator` can
    /// hold several, registered by name — so a rag/full request with no
    /// match here compiles with a no-op retriever rather than failing.
    pub retriever_name: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Result of the synchronous chat path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub content: String,
    pub usage: Usage,
}
