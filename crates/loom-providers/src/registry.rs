use std::sync::Arc;

use dashmap::DashMap;
use tracing::{instrument, warn};

use crate::provider::LlmProvider;
use crate::ProviderError;

/// A registered provider descriptor: a name plus a constructor invoked at
/// most once (lazy, memoized). `env_var` names the credential variable
/// this provider reads, if any.
pub struct ProviderDescriptor {
    pub name: String,
    pub env_var: Option<String>,
    pub build: Box<dyn Fn() -> Arc<dyn LlmProvider> + Send + Sync>,
}

/// Resolves named providers to invocable handles. Loading is lazy: a
/// provider is constructed on first `resolve` call and cached thereafter.
pub struct ProviderRegistry {
    descriptors: DashMap<String, Arc<ProviderDescriptor>>,
    instances: DashMap<String, Arc<dyn LlmProvider>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: DashMap::new(),
            instances: DashMap::new(),
            default_provider: None,
        }
    }

    pub fn register(&self, descriptor: ProviderDescriptor) {
        self.descriptors
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_provider = Some(name.into());
    }

    pub fn default_provider_name(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|e| e.key().clone()).collect()
    }

    /// Resolve a provider by name. Credential presence is checked against
    /// the process environment before the first construction; missing
    /// credential surfaces as `Unavailable`.
    #[instrument(skip(self))]
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        if let Some(existing) = self.instances.get(name) {
            return Ok(existing.clone());
        }

        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| ProviderError::Unavailable(format!("unknown provider: {name}")))?
            .clone();

        if let Some(env_var) = &descriptor.env_var {
            if std::env::var(env_var).is_err() {
                return Err(ProviderError::Unavailable(format!(
                    "missing credential: {env_var}"
                )));
            }
        }

        let instance = (descriptor.build)();
        self.instances.insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    /// Resolve the first provider whose credential is satisfied, in
    /// registration order, skipping (and warning about) any that fail.
    #[instrument(skip(self))]
    pub fn resolve_first_available(&self) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        for entry in self.descriptors.iter() {
            match self.resolve(entry.key()) {
                Ok(provider) => return Ok(provider),
                Err(e) => warn!(provider = %entry.key(), error = %e, "provider unavailable, trying next"),
            }
        }
        Err(ProviderError::Unavailable("no provider available".into()))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GenerateResult, GenerationParams, ProviderMessage};
    use async_trait::async_trait;

    struct Dummy;

    #[async_trait]
    impl LlmProvider for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }

        async fn generate(
            &self,
            _messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            Ok(GenerateResult {
                content: "ok".into(),
                usage: Default::default(),
                stop_reason: "stop".into(),
                tool_calls: vec![],
            })
        }

        fn requires_credential(&self) -> bool {
            false
        }
    }

    #[test]
    fn resolve_is_memoized() {
        let registry = ProviderRegistry::new();
        registry.register(ProviderDescriptor {
            name: "dummy".into(),
            env_var: None,
            build: Box::new(|| Arc::new(Dummy)),
        });

        let a = registry.resolve("dummy").unwrap();
        let b = registry.resolve("dummy").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_credential_is_unavailable() {
        let registry = ProviderRegistry::new();
        registry.register(ProviderDescriptor {
            name: "needs-key".into(),
            env_var: Some("LOOM_TEST_NEVER_SET_XYZ".into()),
            build: Box::new(|| Arc::new(Dummy)),
        });

        let err = registry.resolve("needs-key").unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn unknown_provider_is_unavailable() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("nope").unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
