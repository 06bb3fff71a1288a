use async_trait::async_trait;
use loom_core::{LoomError, WorkflowContext};
use tokio::sync::mpsc;

/// Emitted by a node's streaming variant. The executor wraps every node
/// with its own `node_start`/`node_complete`, so a node only ever needs
/// to report what happens *inside* its own run — today that's tokens and
/// a usage summary, both produced solely by the Model node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Token(String),
    Usage(loom_core::Usage),
}

/// A pure function of `WorkflowContext -> WorkflowContext`, per the node
/// catalog. Nodes that never stream (everything but Model and the
/// ToolRouter↺Model loop) get a free `run_streaming` that just calls
/// `run` and reports nothing on `tx` — mirrors `LlmProvider::stream`'s
/// default fallback to `generate`.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowContext, LoomError>;

    async fn run_streaming(
        &self,
        ctx: WorkflowContext,
        _tx: mpsc::Sender<NodeEvent>,
    ) -> Result<WorkflowContext, LoomError> {
        self.run(ctx).await
    }
}
