pub mod conditional;
pub mod memory;
pub mod model;
pub mod retriever;
pub mod system_prompt;
pub mod tool_router;

pub use conditional::ConditionalNode;
pub use memory::MemoryNode;
pub use model::ModelNode;
pub use retriever::RetrieverNode;
pub use system_prompt::SystemPromptNode;
pub use tool_router::ToolRouterNode;
