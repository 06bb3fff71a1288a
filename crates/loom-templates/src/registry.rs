use std::collections::HashMap;
use std::sync::Arc;

use loom_builder::{compile, BuildRequest, Retriever, Workflow};
use loom_core::LoomError;
use loom_providers::LlmProvider;
use loom_security::SecurityManager;
use loom_tools::Tool;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::catalog::{built_in_templates, WorkflowTemplate};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub missing_tools: Vec<String>,
    pub missing_retrievers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub name: String,
    pub mode: String,
    pub description: String,
    pub required_tools: Vec<String>,
    pub required_retrievers: Vec<String>,
    pub default_params: Value,
}

/// Static named-template catalog plus the template-aware entry point into
/// `WorkflowBuilder`.
pub struct TemplateRegistry {
    templates: HashMap<&'static str, WorkflowTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let templates = built_in_templates().into_iter().map(|t| (t.name, t)).collect();
        Self { templates }
    }

    pub fn get_template(&self, name: &str) -> Result<&WorkflowTemplate, LoomError> {
        self.templates.get(name).ok_or_else(|| {
            let available = self.list_templates().join(", ");
            LoomError::Configuration(format!("template '{name}' not found. available templates: {available}"))
        })
    }

    pub fn list_templates(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.templates.keys().copied().collect();
        names.sort();
        names
    }

    pub fn get_template_info(&self) -> Vec<TemplateInfo> {
        let mut infos: Vec<TemplateInfo> = self
            .templates
            .values()
            .map(|t| TemplateInfo {
                name: t.name.to_string(),
                mode: t.mode.to_string(),
                description: t.description.to_string(),
                required_tools: t.required_tools.iter().map(|s| s.to_string()).collect(),
                required_retrievers: t.required_retrievers.iter().map(|s| s.to_string()).collect(),
                default_params: t.default_params.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Strict subset check: every name in `template.required_*` must
    /// appear in the corresponding `available_*` list (`R subset-of
    /// names(S)`), used here and in `create_from_template`. The original
    /// source's two validators disagreed (one truthiness-only, one a real
    /// subset check); this crate implements the subset check everywhere.
    pub fn validate_requirements(
        &self,
        template_name: &str,
        available_tools: &[String],
        available_retrievers: &[String],
    ) -> Result<ValidationResult, LoomError> {
        let template = self.get_template(template_name)?;

        let missing_tools: Vec<String> = template
            .required_tools
            .iter()
            .filter(|t| !available_tools.iter().any(|a| a == *t))
            .map(|t| t.to_string())
            .collect();

        let missing_retrievers: Vec<String> = template
            .required_retrievers
            .iter()
            .filter(|r| !available_retrievers.iter().any(|a| a == *r))
            .map(|r| r.to_string())
            .collect();

        Ok(ValidationResult {
            valid: missing_tools.is_empty() && missing_retrievers.is_empty(),
            missing_tools,
            missing_retrievers,
        })
    }

    /// Merges `overrides` into the template's default params and delegates
    /// compilation to `WorkflowBuilder`. Requirement checking uses the same
    /// strict subset check as `validate_requirements`: a `tools`/`retriever`
    /// set that merely exists but omits a required name raises
    /// `Configuration`, rather than the original's truthiness-only inline
    /// check.
    #[instrument(skip(self, provider, overrides, retriever, tools, security))]
    #[allow(clippy::too_many_arguments)]
    pub fn create_from_template(
        &self,
        template_name: &str,
        workflow_id: &str,
        provider: Arc<dyn LlmProvider>,
        overrides: Option<Value>,
        retriever: Option<Arc<dyn Retriever>>,
        tools: Vec<Arc<dyn Tool>>,
        security: Arc<SecurityManager>,
    ) -> Result<Workflow, LoomError> {
        let template = self.get_template(template_name)?;

        let available_tool_names: Vec<String> = tools.iter().map(|t| t.name().to_string()).collect();
        let available_retriever_names: Vec<String> =
            retriever.as_ref().map(|r| vec![r.name().to_string()]).unwrap_or_default();

        let missing_tools: Vec<&str> = template
            .required_tools
            .iter()
            .copied()
            .filter(|t| !available_tool_names.iter().any(|a| a == t))
            .collect();
        if !missing_tools.is_empty() {
            return Err(LoomError::Configuration(format!(
                "template '{template_name}' requires tools: {missing_tools:?}"
            )));
        }

        let missing_retrievers: Vec<&str> = template
            .required_retrievers
            .iter()
            .copied()
            .filter(|r| !available_retriever_names.iter().any(|a| a == r))
            .collect();
        if !missing_retrievers.is_empty() {
            return Err(LoomError::Configuration(format!(
                "template '{template_name}' requires retrievers: {missing_retrievers:?}"
            )));
        }

        let mut params = template.default_params.clone();
        if let Some(overrides) = overrides {
            merge_shallow(&mut params, &overrides);
        }

        compile(BuildRequest {
            mode: template.mode,
            workflow_id: workflow_id.to_string(),
            provider,
            config: params,
            retriever,
            tools,
            security,
        })
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_shallow(base: &mut Value, overrides: &Value) {
    if let (Some(base_obj), Some(override_obj)) = (base.as_object_mut(), overrides.as_object()) {
        for (key, value) in override_obj {
            base_obj.insert(key.clone(), value.clone());
        }
    }
}
