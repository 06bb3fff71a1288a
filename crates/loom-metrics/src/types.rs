use std::collections::HashMap;

use chrono::{DateTime, Utc};
use loom_core::{ConversationId, RunId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comprehensive metrics for one workflow execution, immutable once
/// `finalize` is called. Mirrors `WorkflowMetrics` from the original
/// source's dataclass, field for field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub run_id: RunId,
    pub workflow_type: String,
    pub execution_time_ms: u64,
    pub token_usage: HashMap<String, u64>,
    pub tool_calls: u32,
    pub errors: Vec<String>,
    pub user_satisfaction: Option<f64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub provider_name: String,
    pub model_name: String,
    pub retrieval_context_size: usize,
    pub memory_usage_mb: f64,
    pub workflow_config: Value,
    pub success: bool,
}

impl WorkflowMetrics {
    pub fn new(
        workflow_type: impl Into<String>,
        user_id: UserId,
        conversation_id: ConversationId,
        provider_name: impl Into<String>,
        model_name: impl Into<String>,
        workflow_config: Value,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            workflow_type: workflow_type.into(),
            execution_time_ms: 0,
            token_usage: HashMap::new(),
            tool_calls: 0,
            errors: Vec::new(),
            user_satisfaction: None,
            start_time,
            end_time: None,
            user_id,
            conversation_id,
            provider_name: provider_name.into(),
            model_name: model_name.into(),
            retrieval_context_size: 0,
            memory_usage_mb: 0.0,
            workflow_config,
            success: true,
        }
    }

    pub fn add_token_usage(&mut self, provider: &str, tokens: u64) {
        *self.token_usage.entry(provider.to_string()).or_insert(0) += tokens;
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.success = false;
    }

    pub fn total_tokens(&self) -> u64 {
        self.token_usage.values().sum()
    }

    pub fn finalize(&mut self, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.execution_time_ms = (now - self.start_time).num_milliseconds().max(0) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowMetrics {
        WorkflowMetrics::new(
            "tools",
            UserId::new(),
            ConversationId::new(),
            "openai",
            "gpt-4",
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn add_token_usage_accumulates_per_provider() {
        let mut metrics = sample();
        metrics.add_token_usage("openai", 100);
        metrics.add_token_usage("openai", 50);
        assert_eq!(metrics.token_usage["openai"], 150);
        assert_eq!(metrics.total_tokens(), 150);
    }

    #[test]
    fn add_error_marks_unsuccessful() {
        let mut metrics = sample();
        assert!(metrics.success);
        metrics.add_error("boom");
        assert!(!metrics.success);
        assert_eq!(metrics.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn finalize_sets_execution_time() {
        let mut metrics = sample();
        let later = metrics.start_time + chrono::Duration::milliseconds(250);
        metrics.finalize(later);
        assert_eq!(metrics.execution_time_ms, 250);
        assert!(metrics.end_time.is_some());
    }
}
