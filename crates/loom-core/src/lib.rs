pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use config::LoomConfig;
pub use error::{LoomError, Result};
pub use ids::{AgentProfileId, AuditId, ConversationId, MessageId, RunId, UserId};
pub use types::{
    AgentProfile, AgentType, ContextMessage, ConversationStatus, Message, Mode, PendingToolCall,
    PermissionLevel, Role, Usage, WorkflowContext, WorkflowSource,
};
