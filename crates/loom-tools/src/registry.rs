use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{instrument, warn};

use crate::tool::Tool;

/// A registered tool: a name plus a constructor invoked at most once.
pub struct ToolDescriptor {
    pub name: String,
    pub build: Box<dyn Fn() -> Arc<dyn Tool> + Send + Sync>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCacheStats {
    pub registered_names: Vec<String>,
    pub loaded_count: usize,
    pub load_times: Vec<(String, Duration)>,
}

/// Registers tools by name and lazily instantiates them on demand.
/// `get_tools(None)` triggers a one-time full load of every registered
/// tool; `get_tools(Some(names))` loads only those names, populating the
/// instance cache incrementally. Names that aren't registered are logged
/// as warnings and simply omitted from the result — never an error.
pub struct ToolRegistry {
    descriptors: DashMap<String, Arc<ToolDescriptor>>,
    instances: DashMap<String, Arc<dyn Tool>>,
    load_times: DashMap<String, Duration>,
    loaded_all: std::sync::atomic::AtomicBool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: DashMap::new(),
            instances: DashMap::new(),
            load_times: DashMap::new(),
            loaded_all: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn register(&self, descriptor: ToolDescriptor) {
        self.descriptors.insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    fn load_one(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(existing) = self.instances.get(name) {
            return Some(existing.clone());
        }
        let descriptor = self.descriptors.get(name)?.clone();
        let started = Instant::now();
        let instance = (descriptor.build)();
        self.load_times.insert(name.to_string(), started.elapsed());
        self.instances.insert(name.to_string(), instance.clone());
        Some(instance)
    }

    #[instrument(skip(self, required_names))]
    pub fn get_tools(&self, required_names: Option<&[String]>) -> Vec<Arc<dyn Tool>> {
        match required_names {
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let resolved = self.load_one(name);
                    if resolved.is_none() {
                        warn!(tool = %name, "requested tool not registered, skipping");
                    }
                    resolved
                })
                .collect(),
            None => {
                self.loaded_all.store(true, std::sync::atomic::Ordering::Relaxed);
                let names: Vec<String> = self.descriptors.iter().map(|e| e.key().clone()).collect();
                names.iter().filter_map(|name| self.load_one(name)).collect()
            }
        }
    }

    pub fn stats(&self) -> ToolCacheStats {
        ToolCacheStats {
            registered_names: self.descriptors.iter().map(|e| e.key().clone()).collect(),
            loaded_count: self.instances.len(),
            load_times: self.load_times.iter().map(|e| (e.key().clone(), *e.value())).collect(),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolResult;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, input: Value) -> ToolResult {
            ToolResult::success(input.to_string())
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(ToolDescriptor {
            name: "echo".into(),
            build: Box::new(|| Arc::new(Echo)),
        });
        registry
    }

    #[test]
    fn missing_requested_name_is_skipped_not_errored() {
        let registry = registry_with_echo();
        let tools = registry.get_tools(Some(&["echo".to_string(), "nope".to_string()]));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "echo");
    }

    #[test]
    fn get_tools_none_loads_everything_once() {
        let registry = registry_with_echo();
        let tools = registry.get_tools(None);
        assert_eq!(tools.len(), 1);
        let stats = registry.stats();
        assert_eq!(stats.loaded_count, 1);
        assert_eq!(stats.registered_names, vec!["echo".to_string()]);
    }

    #[test]
    fn loading_is_memoized() {
        let registry = registry_with_echo();
        let first = registry.get_tools(Some(&["echo".to_string()]));
        let second = registry.get_tools(Some(&["echo".to_string()]));
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }
}
