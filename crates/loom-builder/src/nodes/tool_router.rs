use std::sync::Arc;

use async_trait::async_trait;
use loom_core::{ContextMessage, LoomError, Role, WorkflowContext};
use loom_security::SecurityManager;
use loom_tools::Tool;
use tokio::sync::mpsc;
use tracing::warn;

use crate::node::{NodeEvent, WorkflowNode};
use crate::nodes::model::ModelNode;

/// The ToolRouter↺Model loop: inspects the last assistant message for
/// pending tool calls, dispatches each through `SecurityManager`, appends
/// a tool-role message per result, then calls the model again — up to
/// `ctx.max_tool_calls` total dispatched calls. Stops as soon as a model
/// response carries no pending tool calls.
pub struct ToolRouterNode {
    pub model: Arc<ModelNode>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub security: Arc<SecurityManager>,
    pub workflow_id: String,
    pub workflow_mode: String,
}

impl ToolRouterNode {
    async fn dispatch_one(&self, ctx: &mut WorkflowContext, call: &loom_core::PendingToolCall) {
        let authorized = self.security.authorize_tool_execution(
            &ctx.user_id,
            &self.workflow_id,
            &self.workflow_mode,
            &call.name,
            None,
            Some(&call.input),
        );

        let (result_content, is_error) = match authorized {
            Err(reason) => {
                ctx.messages.push(ContextMessage::new_with_error(
                    Role::Tool,
                    format!("tool '{}' denied: {}", call.name, reason.as_str()),
                    true,
                ));
                ctx.tool_call_count += 1;
                return;
            }
            Ok(()) => match self.tools.iter().find(|t| t.name() == call.name) {
                Some(tool) => {
                    let result = tool.execute(call.input.clone()).await;
                    (result.content, result.is_error)
                }
                None => {
                    warn!(tool = %call.name, "tool router referenced an unresolvable tool");
                    (format!("unknown tool: {}", call.name), true)
                }
            },
        };

        ctx.messages.push(ContextMessage::new_with_error(Role::Tool, result_content, is_error));
        ctx.tool_call_count += 1;
    }
}

#[async_trait]
impl WorkflowNode for ToolRouterNode {
    fn name(&self) -> &str {
        "tool_router"
    }

    async fn run(&self, mut ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
        loop {
            if ctx.pending_tool_calls.is_empty() || ctx.tool_call_count >= ctx.max_tool_calls {
                break;
            }
            let calls = std::mem::take(&mut ctx.pending_tool_calls);
            for call in &calls {
                if ctx.tool_call_count >= ctx.max_tool_calls {
                    break;
                }
                self.dispatch_one(&mut ctx, call).await;
            }
            ctx = self.model.run(ctx).await?;
        }
        Ok(ctx)
    }

    async fn run_streaming(
        &self,
        mut ctx: WorkflowContext,
        tx: mpsc::Sender<NodeEvent>,
    ) -> Result<WorkflowContext, LoomError> {
        loop {
            if ctx.pending_tool_calls.is_empty() || ctx.tool_call_count >= ctx.max_tool_calls {
                break;
            }
            let calls = std::mem::take(&mut ctx.pending_tool_calls);
            for call in &calls {
                if ctx.tool_call_count >= ctx.max_tool_calls {
                    break;
                }
                self.dispatch_one(&mut ctx, call).await;
            }
            ctx = self.model.run_streaming(ctx, tx.clone()).await?;
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_alias;
    use loom_core::{ConversationId, PendingToolCall, UserId};
    use loom_providers::{GenerateResult, GenerationParams, LlmProvider, ProviderError, ProviderMessage};
    use loom_tools::ToolResult;
    use serde_json::Value;

    struct OneShotProvider;

    #[async_trait_alias]
    impl LlmProvider for OneShotProvider {
        fn name(&self) -> &str {
            "one-shot"
        }

        async fn generate(
            &self,
            _messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            Ok(GenerateResult {
                content: "final answer".into(),
                usage: Default::default(),
                stop_reason: "stop".into(),
                tool_calls: vec![],
            })
        }
    }

    struct Echo;

    #[async_trait_alias]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({})
        }
        async fn execute(&self, input: Value) -> ToolResult {
            ToolResult::success(input.to_string())
        }
    }

    #[tokio::test]
    async fn dispatches_authorized_tool_then_calls_model_again() {
        let security = Arc::new(SecurityManager::new(100, vec![]));
        let user = UserId::new();
        security.grant_tool_permission(&user, "echo", loom_core::PermissionLevel::Write, vec![], None, None);

        let model = Arc::new(ModelNode { provider: Arc::new(OneShotProvider), params: GenerationParams::default() });
        let router = ToolRouterNode {
            model,
            tools: vec![Arc::new(Echo)],
            security,
            workflow_id: "wf1".into(),
            workflow_mode: "tools".into(),
        };

        let mut ctx = WorkflowContext::new(user, ConversationId::new());
        ctx.max_tool_calls = 3;
        ctx.pending_tool_calls = vec![PendingToolCall { id: "1".into(), name: "echo".into(), input: serde_json::json!({"x":1}) }];

        let ctx = router.run(ctx).await.unwrap();
        assert_eq!(ctx.tool_call_count, 1);
        assert!(ctx.messages.iter().any(|m| m.role == Role::Tool));
        assert_eq!(ctx.messages.last().unwrap().content, "final answer");
    }

    struct Fails;

    #[async_trait_alias]
    impl Tool for Fails {
        fn name(&self) -> &str {
            "fails"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({})
        }
        async fn execute(&self, _input: Value) -> ToolResult {
            ToolResult::error("boom")
        }
    }

    #[tokio::test]
    async fn denied_tool_call_is_recorded_with_error_true() {
        let security = Arc::new(SecurityManager::new(100, vec![]));
        let model = Arc::new(ModelNode { provider: Arc::new(OneShotProvider), params: GenerationParams::default() });
        let router = ToolRouterNode {
            model,
            tools: vec![Arc::new(Echo)],
            security,
            workflow_id: "wf1".into(),
            workflow_mode: "tools".into(),
        };

        let user = UserId::new();
        let mut ctx = WorkflowContext::new(user, ConversationId::new());
        ctx.max_tool_calls = 3;
        ctx.pending_tool_calls = vec![PendingToolCall { id: "1".into(), name: "echo".into(), input: serde_json::json!({}) }];

        let ctx = router.run(ctx).await.unwrap();
        assert!(ctx.messages[0].error);
    }

    #[tokio::test]
    async fn failing_tool_call_is_recorded_with_error_true() {
        let security = Arc::new(SecurityManager::new(100, vec![]));
        let user = UserId::new();
        security.grant_tool_permission(&user, "fails", loom_core::PermissionLevel::Write, vec![], None, None);

        let model = Arc::new(ModelNode { provider: Arc::new(OneShotProvider), params: GenerationParams::default() });
        let router = ToolRouterNode {
            model,
            tools: vec![Arc::new(Fails)],
            security,
            workflow_id: "wf1".into(),
            workflow_mode: "tools".into(),
        };

        let mut ctx = WorkflowContext::new(user, ConversationId::new());
        ctx.max_tool_calls = 3;
        ctx.pending_tool_calls = vec![PendingToolCall { id: "1".into(), name: "fails".into(), input: serde_json::json!({}) }];

        let ctx = router.run(ctx).await.unwrap();
        let tool_msg = ctx.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.error);
        assert_eq!(tool_msg.content, "boom");
    }

    #[tokio::test]
    async fn unauthorized_tool_is_denied_without_calling_it() {
        let security = Arc::new(SecurityManager::new(100, vec![]));
        let model = Arc::new(ModelNode { provider: Arc::new(OneShotProvider), params: GenerationParams::default() });
        let router = ToolRouterNode {
            model,
            tools: vec![Arc::new(Echo)],
            security,
            workflow_id: "wf1".into(),
            workflow_mode: "tools".into(),
        };

        let user = UserId::new();
        let mut ctx = WorkflowContext::new(user, ConversationId::new());
        ctx.max_tool_calls = 3;
        ctx.pending_tool_calls = vec![PendingToolCall { id: "1".into(), name: "echo".into(), input: serde_json::json!({}) }];

        let ctx = router.run(ctx).await.unwrap();
        assert!(ctx.messages[0].content.contains("denied"));
    }
}
