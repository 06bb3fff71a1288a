use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use loom_core::Role;

/// A message in the form a provider expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

/// Hyperparameters a profile or call site may override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
    pub logit_bias: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResult {
    pub content: String,
    pub usage: loom_core::Usage,
    pub stop_reason: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One event in a provider's streamed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamItem {
    Token(String),
    Usage(loom_core::Usage),
    ToolCall(ToolCallRequest),
    End { stop_reason: String },
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<ProviderError> for loom_core::LoomError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::RateLimited { .. } => loom_core::LoomError::RateLimit(e.to_string()),
            ProviderError::Cancelled => loom_core::LoomError::Cancelled,
            ProviderError::Unavailable(msg) => loom_core::LoomError::ProviderUnavailable(msg),
            other => loom_core::LoomError::Transient(other.to_string()),
        }
    }
}

/// A named model provider: a generator of tokens/messages. Concrete HTTP
/// wire clients for any one vendor live outside this engine — callers
/// supply implementations; the engine depends only on this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams,
    ) -> Result<GenerateResult, ProviderError>;

    /// Default falls back to `generate` and emits the whole response as a
    /// single token followed by usage and end, matching providers with no
    /// native streaming support.
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams,
        tx: mpsc::Sender<StreamItem>,
    ) -> Result<(), ProviderError> {
        let result = self.generate(messages, params).await?;
        let _ = tx.send(StreamItem::Token(result.content)).await;
        let _ = tx.send(StreamItem::Usage(result.usage)).await;
        let _ = tx
            .send(StreamItem::End { stop_reason: result.stop_reason })
            .await;
        Ok(())
    }

    /// `true` when this provider requires an environment-sourced
    /// credential to operate.
    fn requires_credential(&self) -> bool {
        true
    }
}
