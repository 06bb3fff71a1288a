use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use dashmap::DashMap;
use serde_json::Value;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use loom_builder::{compile, BuildRequest, Retriever, Workflow};
use loom_cache::KeyedWorkflowCache;
use loom_core::{
    ContextMessage, LoomConfig, LoomError, Message, Mode, Result, Role, UserId, Usage,
    WorkflowContext, WorkflowSource,
};
use loom_executor::{StreamEvent, WorkflowExecutor};
use loom_metrics::MetricsCollector;
use loom_providers::{LlmProvider, ProviderRegistry};
use loom_security::SecurityManager;
use loom_store::{Conversation, ConversationStore, NewConversation};
use loom_templates::TemplateRegistry;
use loom_tools::{Tool, ToolRegistry};

use crate::types::{ChatInvocation, ChatOverrides, ChatReply};

struct ResolvedWorkflow {
    workflow: Arc<Workflow>,
    mode: Mode,
}

/// Composes every other component into the ten-step chat path: one struct
/// holding each collaborator by value (or `Arc` where shared with compiled
/// workflows), constructed explicitly and injected rather than reached via
/// a singleton.
pub struct ChatOrchestrator {
    store: ConversationStore,
    providers: ProviderRegistry,
    tools: ToolRegistry,
    security: Arc<SecurityManager>,
    cache: KeyedWorkflowCache<Arc<Workflow>>,
    templates: TemplateRegistry,
    executor: WorkflowExecutor,
    metrics: MetricsCollector,
    retrievers: DashMap<String, Arc<dyn Retriever>>,
    history_window: usize,
    default_run_timeout: Duration,
    max_message_chars: usize,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ConversationStore,
        providers: ProviderRegistry,
        tools: ToolRegistry,
        security: Arc<SecurityManager>,
        cache: KeyedWorkflowCache<Arc<Workflow>>,
        templates: TemplateRegistry,
        executor: WorkflowExecutor,
        metrics: MetricsCollector,
        config: &LoomConfig,
    ) -> Self {
        Self {
            store,
            providers,
            tools,
            security,
            cache,
            templates,
            executor,
            metrics,
            retrievers: DashMap::new(),
            history_window: config.default_history_window,
            default_run_timeout: Duration::from_millis(config.default_run_timeout_ms),
            max_message_chars: config.max_message_chars,
        }
    }

    pub fn register_retriever(&self, name: impl Into<String>, retriever: Arc<dyn Retriever>) {
        self.retrievers.insert(name.into(), retriever);
    }

    pub fn cache_stats(&self) -> loom_cache::CacheStats {
        self.cache.stats()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Steps 1-4 of the synchronous and streaming paths: load or create
    /// the conversation, resolve a provider, resolve (or build and cache)
    /// the workflow, and validate message length. Shared so `chat` and
    /// `chat_stream` can't drift on this logic.
    fn resolve_conversation(
        &self,
        user: &UserId,
        invocation: &ChatInvocation,
    ) -> Result<(Conversation, Vec<Message>)> {
        match &invocation.conversation_id {
            Some(id) => self.store.get_conversation(id, user, true),
            None => {
                let title: String = invocation.message.chars().take(60).collect();
                let conversation = self.store.create_conversation(
                    user,
                    NewConversation { title, ..Default::default() },
                )?;
                Ok((conversation, Vec::new()))
            }
        }
    }

    /// Precedence chain: request override > conversation preference
    /// (stored in `metadata.provider`, there being no dedicated column) >
    /// configured default > first available. `NoProvider` only once every
    /// candidate, including the fallback scan, has failed.
    fn resolve_provider(
        &self,
        conversation: &Conversation,
        overrides: &ChatOverrides,
    ) -> Result<Arc<dyn LlmProvider>> {
        let candidates = [
            overrides.provider.clone(),
            conversation
                .metadata
                .get("provider")
                .and_then(|v| v.as_str())
                .map(String::from),
            self.providers.default_provider_name().map(String::from),
        ];

        for name in candidates.into_iter().flatten() {
            if let Ok(provider) = self.providers.resolve(&name) {
                return Ok(provider);
            }
        }

        self.providers
            .resolve_first_available()
            .map_err(|e| LoomError::NoProvider(e.to_string()))
    }

    fn resolve_retriever(&self, invocation: &ChatInvocation) -> Option<Arc<dyn Retriever>> {
        invocation
            .retriever_name
            .as_ref()
            .and_then(|name| self.retrievers.get(name).map(|e| e.value().clone()))
    }

    /// Build-time tool filtering: resolve the requested names (or every
    /// registered tool) from `ToolRegistry`, then drop any this user has
    /// no standing grant for. Uses `SecurityManager::can_use_tool`, not
    /// `authorize_tool_execution` — filtering a list must not consume rate
    /// limit quota or write an audit entry for tools that are never called.
    fn resolve_tools(&self, user: &UserId, allowed: Option<&[String]>) -> Vec<Arc<dyn Tool>> {
        self.tools
            .get_tools(allowed)
            .into_iter()
            .filter(|tool| self.security.can_use_tool(user, tool.name()))
            .collect()
    }

    fn apply_overrides(config: &mut Value, overrides: &ChatOverrides, enable_memory: bool) {
        if !config.is_object() {
            *config = Value::Object(Default::default());
        }
        let obj = config.as_object_mut().expect("just coerced to object");
        if let Some(system_prompt) = &overrides.system_prompt {
            obj.insert("system_message".to_string(), Value::String(system_prompt.clone()));
        }
        if let Some(temperature) = overrides.temperature {
            obj.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = overrides.max_tokens {
            obj.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
        }
        if enable_memory {
            obj.insert("enable_memory".to_string(), Value::Bool(true));
        }
    }

    /// `WorkflowSource::Template`/`Dynamic` resolve to a compiled workflow,
    /// checking the cache first and populating it on a miss.
    /// `Definition` has no backing component in this engine — no module
    /// owns persisted workflow graphs — so it always fails `Configuration`;
    /// see DESIGN.md's open-question note.
    async fn resolve_workflow(
        &self,
        user: &UserId,
        provider: Arc<dyn LlmProvider>,
        provider_name: &str,
        invocation: &ChatInvocation,
    ) -> Result<ResolvedWorkflow> {
        match &invocation.workflow_source {
            WorkflowSource::Definition { id } => Err(LoomError::Configuration(format!(
                "stored workflow definitions are not supported by this engine (id={id}); \
                 use a template name or a dynamic mode/config pair"
            ))),

            WorkflowSource::Template { name } => {
                let template = self.templates.get_template(name)?;
                let mode = template.mode;

                let mut overrides_value = serde_json::json!({});
                Self::apply_overrides(&mut overrides_value, &invocation.overrides, invocation.enable_memory);
                let cache_mode = format!("template:{name}");

                if let Some(workflow) = self.cache.get(provider_name, &cache_mode, &overrides_value) {
                    return Ok(ResolvedWorkflow { workflow, mode });
                }

                let retriever = self.resolve_retriever(invocation);
                let tools = self.resolve_tools(user, invocation.allowed_tools.as_deref());
                let workflow_id = format!("template:{name}");

                let workflow = Arc::new(self.templates.create_from_template(
                    name,
                    &workflow_id,
                    provider,
                    Some(overrides_value.clone()),
                    retriever,
                    tools,
                    self.security.clone(),
                )?);

                self.cache.put(provider_name, &cache_mode, &overrides_value, workflow.clone());
                Ok(ResolvedWorkflow { workflow, mode })
            }

            WorkflowSource::Dynamic { mode, config } => {
                let mut full_config = config.clone();
                Self::apply_overrides(&mut full_config, &invocation.overrides, invocation.enable_memory);

                let tool_names_from_config = full_config
                    .get("tools")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect::<Vec<_>>());
                let allowed = invocation.allowed_tools.clone().or(tool_names_from_config);

                let mode_key = mode.to_string();
                if let Some(workflow) = self.cache.get(provider_name, &mode_key, &full_config) {
                    return Ok(ResolvedWorkflow { workflow, mode: *mode });
                }

                let retriever = self.resolve_retriever(invocation);
                let tools = self.resolve_tools(user, allowed.as_deref());

                let mut builder_config = full_config.clone();
                if let Some(obj) = builder_config.as_object_mut() {
                    obj.remove("tools");
                }

                let workflow = Arc::new(compile(BuildRequest {
                    mode: *mode,
                    workflow_id: format!("dynamic:{mode_key}"),
                    provider,
                    config: builder_config,
                    retriever,
                    tools,
                    security: self.security.clone(),
                })?);

                self.cache.put(provider_name, &mode_key, &full_config, workflow.clone());
                Ok(ResolvedWorkflow { workflow, mode: *mode })
            }
        }
    }

    fn validate_message(&self, message: &str) -> Result<()> {
        if message.is_empty() || message.chars().count() > self.max_message_chars {
            return Err(LoomError::Validation(format!(
                "message must be between 1 and {} characters",
                self.max_message_chars
            )));
        }
        Ok(())
    }

    fn seed_context(&self, user: &UserId, conversation: &Conversation, history: &[Message], invocation: &ChatInvocation) -> WorkflowContext {
        let mut ctx = WorkflowContext::new(user.clone(), conversation.id.clone());
        for message in history.iter().rev().take(self.history_window).rev() {
            ctx.messages.push(ContextMessage::new(message.role, message.content.clone()));
        }
        ctx.messages.push(ContextMessage::new(Role::User, invocation.message.clone()));
        ctx
    }

    fn extract_usage(ctx: &WorkflowContext) -> Usage {
        ctx.metadata
            .get("usage")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// The synchronous chat path: resolve conversation/provider/workflow,
    /// persist the user turn, run the workflow to completion, persist the
    /// assistant turn, and return both (history load -> request build ->
    /// run -> persist both sides -> return).
    #[instrument(skip(self, invocation), fields(user = %user.as_str()))]
    pub async fn chat(&self, user: &UserId, invocation: ChatInvocation) -> Result<ChatReply> {
        self.validate_message(&invocation.message)?;

        let (conversation, history) = self.resolve_conversation(user, &invocation)?;
        let provider = self.resolve_provider(&conversation, &invocation.overrides)?;
        let provider_name = provider.name().to_string();

        let resolved = self.resolve_workflow(user, provider.clone(), &provider_name, &invocation).await?;

        self.store.add_message(&conversation.id, Role::User, &invocation.message, None, false)?;

        let mut ctx = self.seed_context(user, &conversation, &history, &invocation);
        ctx.max_tool_calls = resolved.workflow.max_tool_calls;

        let run_id = self.metrics.start_workflow(
            &resolved.mode.to_string(),
            user.clone(),
            conversation.id.clone(),
            &provider_name,
            &provider_name,
            serde_json::json!({}),
        );

        let final_ctx = self
            .executor
            .run(&resolved.workflow, ctx, conversation.id.clone(), Some(self.default_run_timeout), None)
            .await;

        let usage = Self::extract_usage(&final_ctx);
        self.metrics.update(
            &run_id,
            Some(&usage_map(&provider_name, usage)),
            Some(final_ctx.tool_call_count),
            final_ctx.retrieval_context.as_ref().map(|s| s.chars().count()),
            None,
            final_ctx.error_state.as_deref(),
        );

        if !final_ctx.success {
            self.metrics.finish(&run_id, None);
            return Err(LoomError::Internal(
                final_ctx.error_state.unwrap_or_else(|| "workflow run failed".to_string()),
            ));
        }

        let assistant_content = final_ctx
            .last_assistant_message()
            .map(|m| m.content.clone())
            .ok_or_else(|| LoomError::Internal("workflow completed without an assistant message".into()))?;

        let assistant_message =
            self.store.add_message(&conversation.id, Role::Assistant, &assistant_content, Some(usage), false)?;

        self.metrics.finish(&run_id, None);

        Ok(ChatReply {
            conversation_id: conversation.id,
            message_id: assistant_message.id,
            content: assistant_message.content,
            usage,
        })
    }

    /// The streaming variant. Events pass through to the caller in real
    /// time; the assistant turn is assembled from `Token` chunks and
    /// persisted only once the underlying stream ends, and only if it
    /// produced any content and wasn't cancelled — a cancelled run with an
    /// empty buffer leaves no assistant message behind.
    #[instrument(skip(self, invocation, cancel), fields(user = %user.as_str()))]
    pub fn chat_stream(
        self: Arc<Self>,
        user: UserId,
        invocation: ChatInvocation,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> {
        stream! {
            yield StreamEvent::Start;

            if let Err(e) = self.validate_message(&invocation.message) {
                yield StreamEvent::Error { message: e.to_string() };
                yield StreamEvent::End;
                return;
            }

            let (conversation, history) = match self.resolve_conversation(&user, &invocation) {
                Ok(v) => v,
                Err(e) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    yield StreamEvent::End;
                    return;
                }
            };

            let provider = match self.resolve_provider(&conversation, &invocation.overrides) {
                Ok(p) => p,
                Err(e) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    yield StreamEvent::End;
                    return;
                }
            };
            let provider_name = provider.name().to_string();

            let resolved = match self.resolve_workflow(&user, provider.clone(), &provider_name, &invocation).await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    yield StreamEvent::End;
                    return;
                }
            };

            if let Err(e) = self.store.add_message(&conversation.id, Role::User, &invocation.message, None, false) {
                yield StreamEvent::Error { message: e.to_string() };
                yield StreamEvent::End;
                return;
            }

            let mut ctx = self.seed_context(&user, &conversation, &history, &invocation);
            ctx.max_tool_calls = resolved.workflow.max_tool_calls;

            let run_id = self.metrics.start_workflow(
                &resolved.mode.to_string(),
                user.clone(),
                conversation.id.clone(),
                &provider_name,
                &provider_name,
                serde_json::json!({}),
            );

            let mut buffer = String::new();
            let mut cancelled = false;
            let mut had_error = false;
            let mut usage = Usage::default();

            let inner = self.executor.stream(
                resolved.workflow.clone(),
                ctx,
                conversation.id.clone(),
                Some(self.default_run_timeout),
                cancel.clone(),
            );
            tokio::pin!(inner);

            while let Some(event) = inner.next().await {
                match &event {
                    StreamEvent::Token { chunk } => buffer.push_str(chunk),
                    StreamEvent::Usage { usage: run_usage } => usage = *run_usage,
                    StreamEvent::Error { message } => {
                        had_error = true;
                        if message == "cancelled" {
                            cancelled = true;
                        }
                    }
                    _ => {}
                }
                yield event;
            }

            // Tool-call count has no event in this stream's vocabulary
            // (NodeStart/NodeComplete/Token/Usage/Error/End carry no counter),
            // so it stays unset here; the synchronous path reports it from
            // the final WorkflowContext, which streaming never materializes.
            self.metrics.update(
                &run_id,
                Some(&usage_map(&provider_name, usage)),
                None,
                None,
                None,
                if had_error { Some("stream error") } else { None },
            );

            if !buffer.is_empty() && !cancelled {
                let _ = self.store.add_message(&conversation.id, Role::Assistant, &buffer, Some(usage), false);
            }

            self.metrics.finish(&run_id, None);
        }
    }
}

fn usage_map(provider_name: &str, usage: Usage) -> HashMap<String, u64> {
    let mut map = HashMap::new();
    map.insert(provider_name.to_string(), usage.total_tokens() as u64);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_providers::{GenerateResult, GenerationParams, ProviderDescriptor, ProviderError, ProviderMessage};
    use loom_tools::{ToolDescriptor, ToolResult};
    use rusqlite::Connection;
    use serde_json::json;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(GenerateResult {
                content: format!("echo: {last}"),
                usage: Usage { prompt_tokens: 3, completion_tokens: 5, cost_usd: 0.0, response_time_ms: 1 },
                stop_reason: "stop".into(),
                tool_calls: vec![],
            })
        }

        fn requires_credential(&self) -> bool {
            false
        }
    }

    struct AlwaysFailProvider;

    #[async_trait]
    impl LlmProvider for AlwaysFailProvider {
        fn name(&self) -> &str {
            "always-fail"
        }

        async fn generate(
            &self,
            _messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            Err(ProviderError::Unavailable("always fails".into()))
        }

        fn requires_credential(&self) -> bool {
            false
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _input: Value) -> ToolResult {
            ToolResult::success("ok")
        }
    }

    fn orchestrator() -> (ChatOrchestrator, LoomConfig) {
        let config = LoomConfig::default();
        let conn = Connection::open_in_memory().unwrap();
        let store = ConversationStore::new(conn, config.max_message_chars, config.max_sequence_retries).unwrap();

        let providers = ProviderRegistry::new();
        providers.register(ProviderDescriptor {
            name: "echo".into(),
            env_var: None,
            build: Box::new(|| Arc::new(EchoProvider)),
        });

        let tools = ToolRegistry::new();
        tools.register(ToolDescriptor { name: "calculator".into(), build: Box::new(|| Arc::new(NamedTool("calculator"))) });

        let security = Arc::new(SecurityManager::new(config.audit_log_capacity, config.content_blocklist.clone()));
        let cache = KeyedWorkflowCache::new(config.cache_capacity);
        let templates = TemplateRegistry::new();
        let executor = WorkflowExecutor::new();
        let metrics = MetricsCollector::new(config.metrics_history_capacity, config.anomaly_k);

        let orchestrator =
            ChatOrchestrator::new(store, providers, tools, security, cache, templates, executor, metrics, &config);
        (orchestrator, config)
    }

    fn plain_invocation(message: &str) -> ChatInvocation {
        ChatInvocation {
            conversation_id: None,
            message: message.to_string(),
            workflow_source: WorkflowSource::Dynamic { mode: Mode::Plain, config: json!({}) },
            overrides: ChatOverrides::default(),
            enable_retrieval: false,
            enable_tools: false,
            enable_memory: false,
            allowed_tools: None,
            retriever_name: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn plain_chat_creates_a_conversation_and_persists_both_turns() {
        let (orchestrator, _) = orchestrator();
        let user = UserId::new();

        let reply = orchestrator.chat(&user, plain_invocation("hello there")).await.unwrap();
        assert_eq!(reply.content, "echo: hello there");

        let (conversation, messages) = orchestrator.store().get_conversation(&reply.conversation_id, &user, true).unwrap();
        assert_eq!(conversation.message_count, 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn second_identical_request_hits_the_workflow_cache() {
        let (orchestrator, _) = orchestrator();
        let user = UserId::new();

        orchestrator.chat(&user, plain_invocation("first")).await.unwrap();
        orchestrator.chat(&user, plain_invocation("second")).await.unwrap();

        let stats = orchestrator.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn unreachable_provider_fails_with_no_provider() {
        let (orchestrator, _) = orchestrator();
        let user = UserId::new();
        let mut invocation = plain_invocation("hi");
        invocation.overrides.provider = Some("nonexistent".into());

        let err = orchestrator.chat(&user, invocation).await.unwrap_err();
        assert_eq!(err.code(), "no_provider");
    }

    #[tokio::test]
    async fn denied_tool_does_not_terminate_the_run_but_is_audited() {
        let (orchestrator, _) = orchestrator();
        let user = UserId::new();

        let invocation = ChatInvocation {
            workflow_source: WorkflowSource::Dynamic { mode: Mode::Tools, config: json!({}) },
            allowed_tools: Some(vec!["calculator".to_string()]),
            ..plain_invocation("use the calculator")
        };

        // no grant: resolve_tools filters "calculator" out entirely, so
        // the compiled tool_router never sees it and the run still succeeds.
        let reply = orchestrator.chat(&user, invocation).await.unwrap();
        assert_eq!(reply.content, "echo: use the calculator");
    }

    #[tokio::test]
    async fn stored_workflow_definitions_are_rejected() {
        let (orchestrator, _) = orchestrator();
        let user = UserId::new();
        let invocation = ChatInvocation {
            workflow_source: WorkflowSource::Definition { id: "wf-123".into() },
            ..plain_invocation("hi")
        };

        let err = orchestrator.chat(&user, invocation).await.unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[tokio::test]
    async fn streaming_cancellation_leaves_no_assistant_message_when_buffer_is_empty() {
        let (orchestrator, _) = orchestrator();
        let orchestrator = Arc::new(orchestrator);
        let user = UserId::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let invocation = plain_invocation("hi");
        let events: Vec<StreamEvent> =
            orchestrator.clone().chat_stream(user.clone(), invocation, cancel).collect().await;

        assert!(matches!(events.first(), Some(StreamEvent::Start)));
        assert!(matches!(events.last(), Some(StreamEvent::End)));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Error { message } if message == "cancelled")));
    }

    #[tokio::test]
    async fn streaming_persists_the_real_usage_not_a_default() {
        let (orchestrator, _) = orchestrator();
        let orchestrator = Arc::new(orchestrator);
        let user = UserId::new();

        let invocation = plain_invocation("hello there");
        let events: Vec<StreamEvent> =
            orchestrator.clone().chat_stream(user.clone(), invocation, CancellationToken::new()).collect().await;

        let usage_events: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Usage { usage } => Some(*usage),
                _ => None,
            })
            .collect();
        assert_eq!(usage_events.len(), 1, "usage must be emitted exactly once");
        assert_eq!(usage_events[0].prompt_tokens, 3);
        assert_eq!(usage_events[0].completion_tokens, 5);

        let (conversations, _) = orchestrator
            .store()
            .list_conversations(&user, &Default::default(), Default::default(), "updated_at")
            .unwrap();
        let (conversation, messages) =
            orchestrator.store().get_conversation(&conversations[0].id, &user, true).unwrap();
        assert_eq!(conversation.message_count, 2);
        let assistant = &messages[1];
        assert_eq!(assistant.usage.unwrap().prompt_tokens, 3);
        assert_eq!(assistant.usage.unwrap().completion_tokens, 5);
    }

    #[tokio::test]
    async fn provider_override_precedes_conversation_preference() {
        let (orchestrator, _) = orchestrator();
        let conversation = orchestrator
            .store()
            .create_conversation(
                &UserId::new(),
                NewConversation {
                    title: "t".into(),
                    metadata: Some(json!({ "provider": "echo" })),
                    ..Default::default()
                },
            )
            .unwrap();
        let provider = orchestrator.resolve_provider(&conversation, &ChatOverrides::default()).unwrap();
        assert_eq!(provider.name(), "echo");
    }

    #[tokio::test]
    async fn no_candidate_provider_falls_back_to_first_available() {
        let (orchestrator, _) = orchestrator();
        let conversation = orchestrator
            .store()
            .create_conversation(&UserId::new(), NewConversation { title: "t".into(), ..Default::default() })
            .unwrap();
        let provider = orchestrator.resolve_provider(&conversation, &ChatOverrides::default()).unwrap();
        assert_eq!(provider.name(), "echo");
    }

    #[tokio::test]
    async fn every_provider_unavailable_is_no_provider() {
        let config = LoomConfig::default();
        let conn = Connection::open_in_memory().unwrap();
        let store = ConversationStore::new(conn, config.max_message_chars, config.max_sequence_retries).unwrap();
        let providers = ProviderRegistry::new();
        providers.register(ProviderDescriptor {
            name: "dead".into(),
            env_var: None,
            build: Box::new(|| Arc::new(AlwaysFailProvider)),
        });
        let tools = ToolRegistry::new();
        let security = Arc::new(SecurityManager::new(100, vec![]));
        let cache = KeyedWorkflowCache::new(10);
        let templates = TemplateRegistry::new();
        let executor = WorkflowExecutor::new();
        let metrics = MetricsCollector::with_defaults();
        let orchestrator =
            ChatOrchestrator::new(store, providers, tools, security, cache, templates, executor, metrics, &config);

        let user = UserId::new();
        let err = orchestrator.chat(&user, plain_invocation("hi")).await.unwrap_err();
        assert_eq!(err.code(), "no_provider");
    }
}
