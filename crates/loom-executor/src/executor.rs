use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use dashmap::DashMap;
use loom_builder::{NodeEvent, Workflow};
use loom_core::{ConversationId, WorkflowContext};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::event::StreamEvent;

/// Drives a compiled `Workflow` over a `WorkflowContext`. Owned, injected
/// value — not a singleton — so `ChatOrchestrator` can hold exactly one
/// and share it across concurrent runs.
///
/// Per-conversation serialization: the map holds one
/// `tokio::sync::Mutex<()>` per conversation id, acquired for the
/// duration of a run so two runs against the same conversation never
/// interleave.
pub struct WorkflowExecutor {
    conversation_locks: DashMap<ConversationId, Arc<AsyncMutex<()>>>,
}

impl WorkflowExecutor {
    pub fn new() -> Self {
        Self { conversation_locks: DashMap::new() }
    }

    fn lock_for(&self, thread_id: &ConversationId) -> Arc<AsyncMutex<()>> {
        self.conversation_locks.entry(thread_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Executes nodes in order; each observes the state its predecessor
    /// produced. On any node raising, attaches the error to `error_state`,
    /// stops, and returns the partial state with `success=false`.
    #[instrument(skip(self, workflow, initial_state, cancel))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        initial_state: WorkflowContext,
        thread_id: ConversationId,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> WorkflowContext {
        let lock = self.lock_for(&thread_id);
        let _guard = lock.lock().await;

        let run_fut = self.run_inner(workflow, initial_state.clone(), cancel);
        match timeout {
            Some(duration) => match tokio::time::timeout(duration, run_fut).await {
                Ok(ctx) => ctx,
                Err(_) => {
                    let mut ctx = initial_state;
                    ctx.success = false;
                    ctx.error_state = Some("timeout".to_string());
                    ctx
                }
            },
            None => run_fut.await,
        }
    }

    async fn run_inner(
        &self,
        workflow: &Workflow,
        mut ctx: WorkflowContext,
        cancel: Option<CancellationToken>,
    ) -> WorkflowContext {
        ctx.max_tool_calls = workflow.max_tool_calls;

        for node in &workflow.nodes {
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    ctx.success = false;
                    ctx.error_state = Some("cancelled".to_string());
                    return ctx;
                }
            }

            match node.run(ctx.clone()).await {
                Ok(next) => {
                    ctx = next;
                    ctx.record_node(node.name());
                }
                Err(e) => {
                    ctx.success = false;
                    ctx.error_state = Some(e.to_string());
                    return ctx;
                }
            }
        }

        ctx
    }

    /// Lazy sequence of `StreamEvent`s. The executor itself emits
    /// `NodeStart`/`NodeComplete` around every node; `Token` surfaces only
    /// from nodes that produce it via `run_streaming` (today, the Model
    /// node and the ToolRouter↺Model loop). `Usage` is accumulated into
    /// context metadata as nodes run and emitted exactly once, after the
    /// terminal node, rather than forwarded live per node. Cancellation
    /// is observed between nodes and after each streamed token.
    #[instrument(skip(self, workflow, initial_state, cancel))]
    pub fn stream(
        &self,
        workflow: Arc<Workflow>,
        initial_state: WorkflowContext,
        thread_id: ConversationId,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> {
        let locks = self.lock_for(&thread_id);

        stream! {
            let _guard = locks.lock().await;
            let mut ctx = initial_state;
            ctx.max_tool_calls = workflow.max_tool_calls;

            let deadline = timeout.map(|d| tokio::time::Instant::now() + d);

            for node in &workflow.nodes {
                if cancel.is_cancelled() {
                    yield StreamEvent::Error { message: "cancelled".to_string() };
                    yield StreamEvent::End;
                    return;
                }
                if let Some(deadline) = deadline {
                    if tokio::time::Instant::now() >= deadline {
                        yield StreamEvent::Error { message: "timeout".to_string() };
                        yield StreamEvent::End;
                        return;
                    }
                }

                let name = node.name().to_string();
                yield StreamEvent::NodeStart { name: name.clone() };

                let (tx, mut rx) = mpsc::channel::<NodeEvent>(32);
                let node = node.clone();
                let node_ctx = ctx.clone();
                let handle = tokio::spawn(async move { node.run_streaming(node_ctx, tx).await });

                let mut cancelled_mid_node = false;
                while let Some(event) = rx.recv().await {
                    if cancel.is_cancelled() {
                        cancelled_mid_node = true;
                        break;
                    }
                    match event {
                        NodeEvent::Token(chunk) => yield StreamEvent::Token { chunk },
                        // Usage is accumulated into `ctx.metadata` by the node itself and
                        // surfaced once, after the terminal node, below — not forwarded here.
                        NodeEvent::Usage(_) => {}
                    }
                }

                if cancelled_mid_node {
                    handle.abort();
                    yield StreamEvent::Error { message: "cancelled".to_string() };
                    yield StreamEvent::End;
                    return;
                }

                match handle.await {
                    Ok(Ok(next)) => {
                        ctx = next;
                        ctx.record_node(&name);
                        yield StreamEvent::NodeComplete { name };
                    }
                    Ok(Err(e)) => {
                        yield StreamEvent::Error { message: e.to_string() };
                        yield StreamEvent::End;
                        return;
                    }
                    Err(e) => {
                        yield StreamEvent::Error { message: e.to_string() };
                        yield StreamEvent::End;
                        return;
                    }
                }
            }

            if let Some(usage) = ctx.metadata.get("usage") {
                if let Ok(usage) = serde_json::from_value::<loom_core::Usage>(usage.clone()) {
                    yield StreamEvent::Usage { usage };
                }
            }
            yield StreamEvent::End;
        }
    }
}

impl Default for WorkflowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_builder::nodes::SystemPromptNode;
    use loom_core::{LoomError, Mode, UserId};
    use tokio_stream::StreamExt;

    struct FailingNode;

    #[async_trait]
    impl loom_builder::WorkflowNode for FailingNode {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self, _ctx: WorkflowContext) -> Result<WorkflowContext, LoomError> {
            Err(LoomError::Internal("boom".to_string()))
        }
    }

    fn workflow(nodes: Vec<Arc<dyn loom_builder::WorkflowNode>>) -> Workflow {
        Workflow::new(Mode::Plain, nodes, 1)
    }

    #[tokio::test]
    async fn run_executes_nodes_in_order() {
        let executor = WorkflowExecutor::new();
        let wf = workflow(vec![Arc::new(SystemPromptNode { message: "hi".into() })]);
        let ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        let result = executor.run(&wf, ctx, ConversationId::new(), None, None).await;
        assert!(result.success);
        assert_eq!(result.execution_history, vec!["system_prompt".to_string()]);
    }

    #[tokio::test]
    async fn run_returns_partial_state_on_node_error() {
        let executor = WorkflowExecutor::new();
        let wf = workflow(vec![Arc::new(SystemPromptNode { message: "hi".into() }), Arc::new(FailingNode)]);
        let ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        let result = executor.run(&wf, ctx, ConversationId::new(), None, None).await;
        assert!(!result.success);
        assert!(result.error_state.unwrap().contains("boom"));
        assert_eq!(result.execution_history, vec!["system_prompt".to_string()]);
    }

    #[tokio::test]
    async fn run_respects_a_pre_cancelled_token() {
        let executor = WorkflowExecutor::new();
        let wf = workflow(vec![Arc::new(SystemPromptNode { message: "hi".into() })]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        let result = executor.run(&wf, ctx, ConversationId::new(), None, Some(cancel)).await;
        assert!(!result.success);
        assert_eq!(result.error_state.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn stream_emits_node_lifecycle_then_end() {
        let executor = WorkflowExecutor::new();
        let wf = Arc::new(workflow(vec![Arc::new(SystemPromptNode { message: "hi".into() })]));
        let ctx = WorkflowContext::new(UserId::new(), ConversationId::new());
        let events: Vec<StreamEvent> =
            executor.stream(wf, ctx, ConversationId::new(), None, CancellationToken::new()).collect::<Vec<_>>().await;

        assert!(matches!(events.first(), Some(StreamEvent::NodeStart { name }) if name == "system_prompt"));
        assert!(matches!(events.last(), Some(StreamEvent::End)));
    }
}
