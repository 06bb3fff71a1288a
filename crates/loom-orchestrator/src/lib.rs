pub mod orchestrator;
pub mod types;

pub use orchestrator::ChatOrchestrator;
pub use types::{ChatInvocation, ChatOverrides, ChatReply};
