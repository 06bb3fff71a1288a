use std::sync::Arc;

use loom_core::Mode;

use crate::node::WorkflowNode;

/// A compiled workflow: a linear plan of nodes. Every mode's graph shape
/// is a DAG that reduces to a sequential plan with one internal loop node
/// for ToolRouter↺Model, so a `Vec` suffices — no general graph-traversal
/// machinery is needed.
pub struct Workflow {
    pub mode: Mode,
    pub nodes: Vec<Arc<dyn WorkflowNode>>,
    pub max_tool_calls: u32,
}

impl Workflow {
    pub fn new(mode: Mode, nodes: Vec<Arc<dyn WorkflowNode>>, max_tool_calls: u32) -> Self {
        Self { mode, nodes, max_tool_calls }
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }
}
