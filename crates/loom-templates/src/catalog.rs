use loom_core::Mode;
use serde_json::{json, Value};

/// A pre-configured workflow template: a mode, default parameters, and
/// the tools/retrievers it requires to be usable.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub name: &'static str,
    pub mode: Mode,
    pub description: &'static str,
    pub default_params: Value,
    pub required_tools: Vec<&'static str>,
    pub required_retrievers: Vec<&'static str>,
}

/// The six built-in templates, carried from the original source with
/// their semantic content (mode, defaults, required tools/retrievers)
/// re-expressed as Rust values.
pub fn built_in_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            name: "customer_support",
            mode: Mode::Full,
            description: "Customer support with knowledge base and tools",
            default_params: json!({
                "enable_memory": true,
                "memory_window": 50,
                "max_tool_calls": 5,
                "system_message": "You are a helpful customer support assistant. Use the knowledge base to find relevant information and available tools to help resolve customer issues. Always be polite, professional, and thorough in your responses.",
            }),
            required_tools: vec!["search_kb", "create_ticket", "escalate"],
            required_retrievers: vec!["support_docs"],
        },
        WorkflowTemplate {
            name: "code_assistant",
            mode: Mode::Tools,
            description: "Programming assistant with code tools",
            default_params: json!({
                "enable_memory": true,
                "memory_window": 100,
                "max_tool_calls": 10,
                "system_message": "You are an expert programming assistant. Help users with coding tasks, debugging, code review, and software development best practices. Use available tools to execute code, run tests, and access documentation when needed.",
            }),
            required_tools: vec!["execute_code", "search_docs", "generate_tests"],
            required_retrievers: vec![],
        },
        WorkflowTemplate {
            name: "research_assistant",
            mode: Mode::Rag,
            description: "Research assistant with document retrieval",
            default_params: json!({
                "enable_memory": true,
                "memory_window": 30,
                "max_documents": 10,
                "system_message": "You are a research assistant. Use the provided documents to answer questions accurately and thoroughly. Always cite your sources and explain your reasoning. If information is not available in the documents, clearly state this limitation.",
            }),
            required_tools: vec![],
            required_retrievers: vec!["research_docs"],
        },
        WorkflowTemplate {
            name: "general_chat",
            mode: Mode::Plain,
            description: "General conversation assistant",
            default_params: json!({
                "enable_memory": true,
                "memory_window": 20,
                "system_message": "You are a helpful, harmless, and honest AI assistant. Engage in natural conversation while being informative and supportive.",
            }),
            required_tools: vec![],
            required_retrievers: vec![],
        },
        WorkflowTemplate {
            name: "document_qa",
            mode: Mode::Rag,
            description: "Document question answering with retrieval",
            default_params: json!({
                "enable_memory": false,
                "max_documents": 15,
                "similarity_threshold": 0.7,
                "system_message": "You are a document analysis assistant. Answer questions based solely on the provided documents. Be precise and cite specific sections when possible.",
            }),
            required_tools: vec![],
            required_retrievers: vec!["document_store"],
        },
        WorkflowTemplate {
            name: "data_analyst",
            mode: Mode::Tools,
            description: "Data analysis assistant with computation tools",
            default_params: json!({
                "enable_memory": true,
                "memory_window": 50,
                "max_tool_calls": 15,
                "system_message": "You are a data analyst assistant. Help users analyze data, create visualizations, and derive insights. Use computational tools to perform calculations and generate charts.",
            }),
            required_tools: vec!["execute_python", "create_chart", "analyze_data"],
            required_retrievers: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_built_in_templates_exist_with_unique_names() {
        let templates = built_in_templates();
        assert_eq!(templates.len(), 6);
        let mut names: Vec<&str> = templates.iter().map(|t| t.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
    }
}
