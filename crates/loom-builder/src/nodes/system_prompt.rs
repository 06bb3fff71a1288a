use async_trait::async_trait;
use loom_core::{ContextMessage, LoomError, Role, WorkflowContext};

use crate::node::WorkflowNode;

/// Prepends a system message if the context doesn't already carry one.
pub struct SystemPromptNode {
    pub message: String,
}

#[async_trait]
impl WorkflowNode for SystemPromptNode {
    fn name(&self) -> &str {
        "system_prompt"
    }

    async fn run(&self, mut ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
        if !ctx.has_system_message() {
            ctx.messages.insert(0, ContextMessage::new(Role::System, self.message.clone()));
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::{ConversationId, UserId};

    #[tokio::test]
    async fn prepends_system_message_when_absent() {
        let node = SystemPromptNode { message: "be helpful".into() };
        let ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        let ctx = node.run(ctx).await.unwrap();
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn does_not_duplicate_existing_system_message() {
        let node = SystemPromptNode { message: "be helpful".into() };
        let mut ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        ctx.messages.push(ContextMessage::new(Role::System, "already here".into()));
        let ctx = node.run(ctx).await.unwrap();
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].content, "already here");
    }
}
