use async_trait::async_trait;
use serde_json::Value;

/// Result of invoking a tool. `is_error` lets the ToolRouter attach
/// `error=true` metadata to the resulting tool-role message without the
/// run itself failing.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true }
    }
}

/// A callable tool with a name, declared input schema, and an optional
/// method allowlist used by SecurityManager's `can_execute` check.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    async fn execute(&self, input: Value) -> ToolResult;
}
