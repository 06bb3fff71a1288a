use std::sync::Arc;

use async_trait::async_trait;
use loom_core::{LoomError, Role, WorkflowContext};

use crate::node::WorkflowNode;
use crate::retriever::Retriever;

/// Fetches top-k passages for the latest user message and sets
/// `retrieval_context`. A no-op when nothing comes back, which is how a
/// `NullRetriever` substitutes for "no retriever configured" without the
/// builder special-casing `None`.
pub struct RetrieverNode {
    pub retriever: Arc<dyn Retriever>,
    pub top_k: usize,
}

#[async_trait]
impl WorkflowNode for RetrieverNode {
    fn name(&self) -> &str {
        "retriever"
    }

    async fn run(&self, mut ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
        let query = ctx
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());

        let Some(query) = query else {
            return Ok(ctx);
        };

        let passages = self.retriever.retrieve(&query, self.top_k).await;
        if !passages.is_empty() {
            let joined = passages
                .iter()
                .map(|p| format!("[{}] {}", p.source, p.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            ctx.retrieval_context = Some(joined);
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::{NullRetriever, RetrievedPassage};
    use loom_core::{ContextMessage, ConversationId, UserId};

    struct Fixed;

    #[async_trait]
    impl Retriever for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<RetrievedPassage> {
            vec![RetrievedPassage { source: "doc1".into(), content: "relevant text".into(), score: 0.9 }]
        }
    }

    #[tokio::test]
    async fn null_retriever_leaves_context_unset() {
        let node = RetrieverNode { retriever: Arc::new(NullRetriever), top_k: 5 };
        let mut ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        ctx.messages.push(ContextMessage::new(Role::User, "question"));
        let ctx = node.run(ctx).await.unwrap();
        assert!(ctx.retrieval_context.is_none());
    }

    #[tokio::test]
    async fn populated_retriever_sets_retrieval_context() {
        let node = RetrieverNode { retriever: Arc::new(Fixed), top_k: 5 };
        let mut ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        ctx.messages.push(ContextMessage::new(Role::User, "question"));
        let ctx = node.run(ctx).await.unwrap();
        assert!(ctx.retrieval_context.unwrap().contains("relevant text"));
    }
}
