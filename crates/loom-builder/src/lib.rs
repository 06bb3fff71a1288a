pub mod compile;
pub mod config;
pub mod node;
pub mod nodes;
pub mod retriever;
pub mod workflow;

pub use compile::{compile, BuildRequest};
pub use config::WorkflowParams;
pub use node::{NodeEvent, WorkflowNode};
pub use retriever::{NullRetriever, Retriever, RetrievedPassage};
pub use workflow::Workflow;
