pub mod catalog;
pub mod registry;

pub use catalog::{built_in_templates, WorkflowTemplate};
pub use registry::{TemplateInfo, TemplateRegistry, ValidationResult};
