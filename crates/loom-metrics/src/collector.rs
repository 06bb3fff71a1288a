use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use loom_core::{ConversationId, RunId, UserId};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::types::WorkflowMetrics;

pub const DEFAULT_MAX_HISTORY: usize = 10_000;
pub const DEFAULT_ANOMALY_K: f64 = 3.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsStats {
    pub total_executions: usize,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub min_execution_time_ms: u64,
    pub max_execution_time_ms: u64,
    pub total_tokens: u64,
    pub total_tool_calls: u32,
    pub error_count: usize,
    pub workflow_types: HashMap<String, usize>,
    pub providers: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub run_id: RunId,
    pub workflow_type: String,
    pub user_id: UserId,
    pub timestamp: chrono::DateTime<Utc>,
    pub error: String,
    pub provider: String,
    pub model: String,
}

struct CollectorState {
    active: HashMap<RunId, WorkflowMetrics>,
    history: VecDeque<WorkflowMetrics>,
}

/// Lifecycle tracker for workflow runs plus aggregation over a bounded,
/// immutable-after-finish history. An owned, injected value — the
/// original's module-level `workflow_metrics_collector` singleton is not
/// carried forward, per the anti-singleton redesign.
pub struct MetricsCollector {
    state: Mutex<CollectorState>,
    max_history: usize,
    anomaly_k: f64,
}

impl MetricsCollector {
    pub fn new(max_history: usize, anomaly_k: f64) -> Self {
        Self {
            state: Mutex::new(CollectorState { active: HashMap::new(), history: VecDeque::new() }),
            max_history: max_history.max(1),
            anomaly_k,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_HISTORY, DEFAULT_ANOMALY_K)
    }

    #[instrument(skip(self, workflow_config))]
    pub fn start_workflow(
        &self,
        workflow_type: &str,
        user_id: UserId,
        conversation_id: ConversationId,
        provider_name: &str,
        model_name: &str,
        workflow_config: Value,
    ) -> RunId {
        let metrics = WorkflowMetrics::new(
            workflow_type,
            user_id.clone(),
            conversation_id,
            provider_name,
            model_name,
            workflow_config,
            Utc::now(),
        );
        let run_id = metrics.run_id.clone();

        let mut state = self.state.lock().expect("metrics collector poisoned");
        state.active.insert(run_id.clone(), metrics);

        info!(run_id = %run_id, workflow_type, user_id = %user_id, "started workflow tracking");
        run_id
    }

    #[instrument(skip(self, token_usage))]
    pub fn update(
        &self,
        run_id: &RunId,
        token_usage: Option<&HashMap<String, u64>>,
        tool_calls: Option<u32>,
        retrieval_context_size: Option<usize>,
        memory_usage_mb: Option<f64>,
        error: Option<&str>,
    ) {
        let mut state = self.state.lock().expect("metrics collector poisoned");
        let Some(metrics) = state.active.get_mut(run_id) else {
            warn!(run_id = %run_id, "attempted to update metrics for unknown workflow");
            return;
        };

        if let Some(usage) = token_usage {
            for (provider, tokens) in usage {
                metrics.add_token_usage(provider, *tokens);
            }
        }
        if let Some(calls) = tool_calls {
            metrics.tool_calls += calls;
        }
        if let Some(size) = retrieval_context_size {
            metrics.retrieval_context_size = size;
        }
        if let Some(mb) = memory_usage_mb {
            metrics.memory_usage_mb = mb;
        }
        if let Some(message) = error {
            metrics.add_error(message);
        }
    }

    #[instrument(skip(self))]
    pub fn finish(&self, run_id: &RunId, user_satisfaction: Option<f64>) -> Option<WorkflowMetrics> {
        let mut state = self.state.lock().expect("metrics collector poisoned");
        let Some(mut metrics) = state.active.remove(run_id) else {
            warn!(run_id = %run_id, "attempted to finish tracking for unknown workflow");
            return None;
        };

        if let Some(satisfaction) = user_satisfaction {
            metrics.user_satisfaction = Some(satisfaction);
        }
        metrics.finalize(Utc::now());

        info!(run_id = %run_id, execution_time_ms = metrics.execution_time_ms, success = metrics.success, "finished workflow tracking");

        state.history.push_back(metrics.clone());
        while state.history.len() > self.max_history {
            state.history.pop_front();
        }

        Some(metrics)
    }

    pub fn stats(&self, workflow_type: Option<&str>, user_id: Option<&UserId>, hours: i64) -> MetricsStats {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let state = self.state.lock().expect("metrics collector poisoned");

        let filtered: Vec<&WorkflowMetrics> = state
            .history
            .iter()
            .filter(|m| m.start_time > cutoff)
            .filter(|m| workflow_type.map(|t| m.workflow_type == t).unwrap_or(true))
            .filter(|m| user_id.map(|u| &m.user_id == u).unwrap_or(true))
            .collect();

        if filtered.is_empty() {
            return MetricsStats::default();
        }

        let total_executions = filtered.len();
        let successful = filtered.iter().filter(|m| m.success).count();
        let times: Vec<u64> = filtered.iter().map(|m| m.execution_time_ms).collect();
        let total_tokens = filtered.iter().map(|m| m.total_tokens()).sum();
        let total_tool_calls = filtered.iter().map(|m| m.tool_calls).sum();
        let error_count = filtered.iter().map(|m| m.errors.len()).sum();

        let mut workflow_types = HashMap::new();
        let mut providers = HashMap::new();
        for m in &filtered {
            *workflow_types.entry(m.workflow_type.clone()).or_insert(0) += 1;
            if !m.provider_name.is_empty() {
                *providers.entry(m.provider_name.clone()).or_insert(0) += 1;
            }
        }

        MetricsStats {
            total_executions,
            success_rate: successful as f64 / total_executions as f64,
            avg_execution_time_ms: times.iter().sum::<u64>() as f64 / times.len() as f64,
            min_execution_time_ms: *times.iter().min().unwrap(),
            max_execution_time_ms: *times.iter().max().unwrap(),
            total_tokens,
            total_tool_calls,
            error_count,
            workflow_types,
            providers,
        }
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        let state = self.state.lock().expect("metrics collector poisoned");
        let mut errors = Vec::new();

        for metrics in state.history.iter().rev() {
            for error in &metrics.errors {
                errors.push(ErrorEntry {
                    run_id: metrics.run_id.clone(),
                    workflow_type: metrics.workflow_type.clone(),
                    user_id: metrics.user_id.clone(),
                    timestamp: metrics.start_time,
                    error: error.clone(),
                    provider: metrics.provider_name.clone(),
                    model: metrics.model_name.clone(),
                });
                if errors.len() >= limit {
                    return errors;
                }
            }
        }
        errors
    }

    /// Flags runs in the trailing `hours` window whose execution time
    /// exceeds `k * mean(baseline)`, where the baseline is the mean
    /// execution time of every run in that same window (including the
    /// flagged run itself). The original source has no anomaly detection
    /// to ground this on, so this is a minimal, self-consistent
    /// definition.
    pub fn detect_anomalies(&self, hours: i64, k: Option<f64>) -> Vec<RunId> {
        let k = k.unwrap_or(self.anomaly_k);
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let state = self.state.lock().expect("metrics collector poisoned");

        let window: Vec<&WorkflowMetrics> = state.history.iter().filter(|m| m.start_time > cutoff).collect();
        if window.is_empty() {
            return Vec::new();
        }

        let mean = window.iter().map(|m| m.execution_time_ms as f64).sum::<f64>() / window.len() as f64;
        let threshold = k * mean;

        window
            .iter()
            .filter(|m| m.execution_time_ms as f64 > threshold)
            .map(|m| m.run_id.clone())
            .collect()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_update_finish_lifecycle() {
        let collector = MetricsCollector::with_defaults();
        let user = UserId::new();
        let run_id = collector.start_workflow("tools", user.clone(), ConversationId::new(), "openai", "gpt-4", serde_json::json!({}));

        let mut usage = HashMap::new();
        usage.insert("openai".to_string(), 200u64);
        collector.update(&run_id, Some(&usage), Some(2), Some(512), Some(12.5), None);

        let finished = collector.finish(&run_id, Some(0.9)).unwrap();
        assert_eq!(finished.total_tokens(), 200);
        assert_eq!(finished.tool_calls, 2);
        assert_eq!(finished.user_satisfaction, Some(0.9));
        assert!(finished.success);
    }

    #[test]
    fn update_on_unknown_run_is_a_no_op() {
        let collector = MetricsCollector::with_defaults();
        collector.update(&RunId::new(), None, Some(1), None, None, None);
        assert_eq!(collector.stats(None, None, 24).total_executions, 0);
    }

    #[test]
    fn stats_aggregates_across_filtered_window() {
        let collector = MetricsCollector::with_defaults();
        let user = UserId::new();
        for _ in 0..3 {
            let run_id = collector.start_workflow("tools", user.clone(), ConversationId::new(), "openai", "gpt-4", serde_json::json!({}));
            collector.finish(&run_id, None);
        }
        let run_id = collector.start_workflow("tools", user.clone(), ConversationId::new(), "openai", "gpt-4", serde_json::json!({}));
        collector.update(&run_id, None, None, None, None, Some("failed"));
        collector.finish(&run_id, None);

        let stats = collector.stats(Some("tools"), None, 24);
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.error_count, 1);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn recent_errors_returns_newest_first_up_to_limit() {
        let collector = MetricsCollector::with_defaults();
        let user = UserId::new();
        for i in 0..3 {
            let run_id = collector.start_workflow("tools", user.clone(), ConversationId::new(), "openai", "gpt-4", serde_json::json!({}));
            collector.update(&run_id, None, None, None, None, Some(&format!("err-{i}")));
            collector.finish(&run_id, None);
        }

        let errors = collector.recent_errors(2);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].error, "err-2");
    }

    #[test]
    fn detect_anomalies_flags_outlier_execution_time() {
        let collector = MetricsCollector::with_defaults();
        let user = UserId::new();

        for _ in 0..4 {
            let mut metrics = WorkflowMetrics::new("tools", user.clone(), ConversationId::new(), "openai", "gpt-4", serde_json::json!({}), Utc::now());
            metrics.finalize(metrics.start_time + chrono::Duration::milliseconds(100));
            collector.state.lock().unwrap().history.push_back(metrics);
        }
        let mut outlier = WorkflowMetrics::new("tools", user, ConversationId::new(), "openai", "gpt-4", serde_json::json!({}), Utc::now());
        outlier.finalize(outlier.start_time + chrono::Duration::milliseconds(10_000));
        let outlier_id = outlier.run_id.clone();
        collector.state.lock().unwrap().history.push_back(outlier);

        let anomalies = collector.detect_anomalies(24, None);
        assert_eq!(anomalies, vec![outlier_id]);
    }
}
