use std::sync::Arc;

use async_trait::async_trait;
use loom_core::{ContextMessage, LoomError, PendingToolCall, Role, WorkflowContext};
use loom_providers::{GenerationParams, LlmProvider, ProviderMessage, StreamItem};
use serde_json::json;
use tokio::sync::mpsc;

use crate::node::{NodeEvent, WorkflowNode};

/// Invokes `provider.generate` (or `provider.stream` when driven through
/// `run_streaming`) with the current message list, appends the assistant
/// message, records usage into `metadata`, and stages any tool calls the
/// model asked for in `pending_tool_calls`.
pub struct ModelNode {
    pub provider: Arc<dyn LlmProvider>,
    pub params: GenerationParams,
}

impl ModelNode {
    fn to_provider_messages(ctx: &WorkflowContext) -> Vec<ProviderMessage> {
        let mut messages: Vec<ProviderMessage> =
            ctx.messages.iter().map(|m| ProviderMessage { role: m.role, content: m.content.clone() }).collect();

        if let Some(retrieval) = &ctx.retrieval_context {
            let insert_at = messages.iter().rposition(|m| m.role == Role::User).unwrap_or(messages.len());
            messages.insert(
                insert_at,
                ProviderMessage {
                    role: Role::System,
                    content: format!("Relevant context:\n{retrieval}"),
                },
            );
        }
        messages
    }

    fn accumulate_usage(ctx: &mut WorkflowContext, usage: loom_core::Usage) {
        let existing = ctx.metadata.get("usage").cloned().unwrap_or_else(|| {
            json!({ "prompt_tokens": 0, "completion_tokens": 0, "cost_usd": 0.0, "response_time_ms": 0 })
        });
        let merged = json!({
            "prompt_tokens": existing["prompt_tokens"].as_u64().unwrap_or(0) + usage.prompt_tokens as u64,
            "completion_tokens": existing["completion_tokens"].as_u64().unwrap_or(0) + usage.completion_tokens as u64,
            "cost_usd": existing["cost_usd"].as_f64().unwrap_or(0.0) + usage.cost_usd,
            "response_time_ms": existing["response_time_ms"].as_u64().unwrap_or(0) + usage.response_time_ms,
        });
        ctx.metadata.insert("usage".to_string(), merged);
    }
}

#[async_trait]
impl WorkflowNode for ModelNode {
    fn name(&self) -> &str {
        "model"
    }

    async fn run(&self, mut ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
        let provider_messages = Self::to_provider_messages(&ctx);
        let result = self.provider.generate(&provider_messages, &self.params).await?;

        ctx.messages.push(ContextMessage::new(Role::Assistant, result.content.clone()));
        Self::accumulate_usage(&mut ctx, result.usage);

        ctx.pending_tool_calls = result
            .tool_calls
            .into_iter()
            .map(|call| PendingToolCall { id: call.id, name: call.name, input: call.input })
            .collect();

        Ok(ctx)
    }

    async fn run_streaming(
        &self,
        mut ctx: WorkflowContext,
        tx: mpsc::Sender<NodeEvent>,
    ) -> Result<WorkflowContext, LoomError> {
        let provider_messages = Self::to_provider_messages(&ctx);
        let (inner_tx, mut inner_rx) = mpsc::channel::<StreamItem>(32);

        let provider = self.provider.clone();
        let params = self.params.clone();
        let handle = tokio::spawn(async move { provider.stream(&provider_messages, &params, inner_tx).await });

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        while let Some(item) = inner_rx.recv().await {
            match item {
                StreamItem::Token(chunk) => {
                    content.push_str(&chunk);
                    let _ = tx.send(NodeEvent::Token(chunk)).await;
                }
                StreamItem::Usage(usage) => {
                    Self::accumulate_usage(&mut ctx, usage);
                    let _ = tx.send(NodeEvent::Usage(usage)).await;
                }
                StreamItem::ToolCall(call) => {
                    tool_calls.push(PendingToolCall { id: call.id, name: call.name, input: call.input });
                }
                StreamItem::End { .. } => break,
                StreamItem::Error(msg) => return Err(LoomError::ProviderUnavailable(msg)),
            }
        }

        handle.await.map_err(|e| LoomError::Internal(e.to_string()))?.map_err(LoomError::from)?;

        ctx.messages.push(ContextMessage::new(Role::Assistant, content));
        ctx.pending_tool_calls = tool_calls;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::{ConversationId, UserId};
    use loom_providers::{GenerateResult, ProviderError};

    struct Echoer;

    #[async_trait]
    impl LlmProvider for Echoer {
        fn name(&self) -> &str {
            "echoer"
        }

        async fn generate(
            &self,
            messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(GenerateResult {
                content: format!("echo: {last}"),
                usage: loom_core::Usage { prompt_tokens: 10, completion_tokens: 5, cost_usd: 0.01, response_time_ms: 50 },
                stop_reason: "stop".into(),
                tool_calls: vec![],
            })
        }
    }

    #[tokio::test]
    async fn appends_assistant_message_and_usage() {
        let node = ModelNode { provider: Arc::new(Echoer), params: GenerationParams::default() };
        let mut ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        ctx.messages.push(ContextMessage::new(Role::User, "hello"));

        let ctx = node.run(ctx).await.unwrap();
        assert_eq!(ctx.messages.last().unwrap().content, "echo: hello");
        assert_eq!(ctx.metadata["usage"]["prompt_tokens"], 10);
    }

    #[tokio::test]
    async fn retrieval_context_is_folded_into_provider_call_only() {
        let node = ModelNode { provider: Arc::new(Echoer), params: GenerationParams::default() };
        let mut ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        ctx.messages.push(ContextMessage::new(Role::User, "hello"));
        ctx.retrieval_context = Some("background facts".into());

        let ctx = node.run(ctx).await.unwrap();
        // the persisted message list never gained a synthetic system entry
        assert_eq!(ctx.messages.len(), 2);
    }
}
