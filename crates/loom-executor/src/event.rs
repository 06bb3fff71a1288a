use serde::{Deserialize, Serialize};

/// Events emitted while streaming a workflow run. Token events come only
/// from the Model node (directly, or from inside the ToolRouter↺Model
/// loop); every other node only ever produces `NodeStart`/`NodeComplete`.
/// Ordering guarantee: for a given node, `NodeStart` precedes any `Token`
/// it emits, which precede `NodeComplete`; `Usage` is emitted exactly
/// once after the terminal node; `End` closes the sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Emitted once by the orchestrator before the first node runs.
    /// Distinct from `NodeStart`: this marks the run itself, not a node.
    Start,
    NodeStart { name: String },
    NodeComplete { name: String },
    Token { chunk: String },
    Usage { usage: loom_core::Usage },
    Error { message: String },
    End,
}
