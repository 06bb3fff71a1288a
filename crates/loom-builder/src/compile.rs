use std::sync::Arc;

use loom_core::{LoomError, Mode};
use loom_providers::LlmProvider;
use loom_security::SecurityManager;
use loom_tools::Tool;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::config::WorkflowParams;
use crate::node::WorkflowNode;
use crate::nodes::{MemoryNode, ModelNode, RetrieverNode, SystemPromptNode, ToolRouterNode};
use crate::retriever::{NullRetriever, Retriever};
use crate::workflow::Workflow;

/// Everything `compile` needs to produce a `Workflow` for one mode.
pub struct BuildRequest {
    pub mode: Mode,
    pub workflow_id: String,
    pub provider: Arc<dyn LlmProvider>,
    pub config: Value,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub security: Arc<SecurityManager>,
}

/// Compiles a mode-specific graph. Pre-compile validation: mode is
/// always one of the four enum variants by construction; unknown config
/// keys are rejected via `WorkflowParams::parse`; rag/full with no
/// retriever substitutes a no-op and warns; tools/full with no
/// resolvable tools warns but still compiles (the ToolRouter will simply
/// never see a tool call it can dispatch).
#[instrument(skip(request))]
pub fn compile(request: BuildRequest) -> Result<Workflow, LoomError> {
    let params = WorkflowParams::parse(&request.config)
        .map_err(|e| LoomError::Configuration(format!("unrecognized workflow config: {e}")))?;

    if request.mode.wants_retrieval() && request.retriever.is_none() {
        warn!(workflow_id = %request.workflow_id, "rag/full mode with no retriever configured, using a no-op retriever");
    }
    if request.mode.wants_tools() && request.tools.is_empty() {
        warn!(workflow_id = %request.workflow_id, "tools/full mode with no tools resolvable");
    }

    let retriever = request.retriever.clone().unwrap_or_else(|| Arc::new(NullRetriever));
    let system_prompt: Arc<dyn WorkflowNode> =
        Arc::new(SystemPromptNode { message: params.system_message_or_default() });
    let model = Arc::new(ModelNode { provider: request.provider.clone(), params: params.to_generation_params() });

    let mut nodes: Vec<Arc<dyn WorkflowNode>> = vec![system_prompt];
    let max_tool_calls = params.max_tool_calls_or_default();

    match request.mode {
        Mode::Plain => {
            if params.enable_memory {
                nodes.push(Arc::new(MemoryNode { window: params.memory_window_or_default() }));
            }
            nodes.push(model);
        }
        Mode::Rag => {
            nodes.push(Arc::new(RetrieverNode { retriever, top_k: params.top_k_or_default() }));
            nodes.push(model);
        }
        Mode::Tools => {
            if params.enable_memory {
                nodes.push(Arc::new(MemoryNode { window: params.memory_window_or_default() }));
            }
            nodes.push(model.clone());
            nodes.push(tool_router_node(&request, model, max_tool_calls));
        }
        Mode::Full => {
            nodes.push(Arc::new(RetrieverNode { retriever, top_k: params.top_k_or_default() }));
            if params.enable_memory {
                nodes.push(Arc::new(MemoryNode { window: params.memory_window_or_default() }));
            }
            nodes.push(model.clone());
            nodes.push(tool_router_node(&request, model, max_tool_calls));
        }
    }

    Ok(Workflow::new(request.mode, nodes, max_tool_calls))
}

fn tool_router_node(request: &BuildRequest, model: Arc<ModelNode>, _max_tool_calls: u32) -> Arc<dyn WorkflowNode> {
    Arc::new(ToolRouterNode {
        model,
        tools: request.tools.clone(),
        security: request.security.clone(),
        workflow_id: request.workflow_id.clone(),
        workflow_mode: request.mode.to_string(),
    })
}
