use serde::Deserialize;
use serde_json::Value;

/// The builder's full set of recognized configuration keys. Anything the
/// caller passes outside this set is rejected at compile time rather than
/// silently ignored — `#[serde(deny_unknown_fields)]` gives us that for
/// free, the same way the builder rejects unknown config keys with
/// `Configuration`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowParams {
    pub system_message: Option<String>,
    #[serde(default)]
    pub enable_memory: bool,
    pub memory_window: Option<usize>,
    pub max_tool_calls: Option<u32>,
    pub max_documents: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";
pub const DEFAULT_MEMORY_WINDOW: usize = 20;
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 1;
pub const DEFAULT_TOP_K: usize = 5;

impl WorkflowParams {
    pub fn parse(raw: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw.clone())
    }

    pub fn system_message_or_default(&self) -> String {
        self.system_message.clone().unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string())
    }

    pub fn memory_window_or_default(&self) -> usize {
        self.memory_window.unwrap_or(DEFAULT_MEMORY_WINDOW)
    }

    pub fn max_tool_calls_or_default(&self) -> u32 {
        self.max_tool_calls.unwrap_or(DEFAULT_MAX_TOOL_CALLS)
    }

    pub fn top_k_or_default(&self) -> usize {
        self.max_documents.unwrap_or(DEFAULT_TOP_K)
    }

    pub fn to_generation_params(&self) -> loom_providers::GenerationParams {
        loom_providers::GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            stop_sequences: self.stop_sequences.clone(),
            seed: self.seed,
            logit_bias: None,
        }
    }
}
