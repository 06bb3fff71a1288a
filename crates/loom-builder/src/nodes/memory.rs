use async_trait::async_trait;
use loom_core::{LoomError, WorkflowContext};

use crate::node::WorkflowNode;

/// Summarizes messages beyond `window` into `conversation_summary` and
/// truncates the raw history to the most recent `window` messages. A
/// no-op while the history is still within the window.
pub struct MemoryNode {
    pub window: usize,
}

#[async_trait]
impl WorkflowNode for MemoryNode {
    fn name(&self) -> &str {
        "memory"
    }

    async fn run(&self, mut ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
        if ctx.messages.len() <= self.window {
            return Ok(ctx);
        }

        let split_at = ctx.messages.len() - self.window;
        let overflow: Vec<_> = ctx.messages.drain(0..split_at).collect();

        let summary_body = overflow
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        ctx.conversation_summary = Some(match ctx.conversation_summary.take() {
            Some(previous) => format!("{previous}\n{summary_body}"),
            None => summary_body,
        });

        Ok(ctx)
    }
}
