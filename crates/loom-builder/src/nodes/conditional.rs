use std::sync::Arc;

use async_trait::async_trait;
use loom_core::{LoomError, WorkflowContext};

use crate::node::WorkflowNode;

/// Evaluates a condition over `WorkflowContext` and selects a branch.
/// Neither of the four standard graph shapes uses this node directly; it
/// exists as general-purpose infrastructure for a future mode or a
/// template override that needs a branch point.
pub struct ConditionalNode {
    pub name: String,
    pub predicate: Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>,
    pub if_true: Arc<dyn WorkflowNode>,
    pub if_false: Option<Arc<dyn WorkflowNode>>,
}

#[async_trait]
impl WorkflowNode for ConditionalNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
        if (self.predicate)(&ctx) {
            self.if_true.run(ctx).await
        } else if let Some(branch) = &self.if_false {
            branch.run(ctx).await
        } else {
            Ok(ctx)
        }
    }
}
