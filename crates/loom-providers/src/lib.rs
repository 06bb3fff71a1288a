pub mod provider;
pub mod registry;
pub mod router;

pub use provider::{
    GenerateResult, GenerationParams, LlmProvider, ProviderError, ProviderMessage, StreamItem,
    ToolCallRequest,
};
pub use registry::{ProviderDescriptor, ProviderRegistry};
pub use router::ProviderRouter;
