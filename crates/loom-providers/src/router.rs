use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::provider::{GenerateResult, GenerationParams, LlmProvider, ProviderError, ProviderMessage, StreamItem};

struct ProviderSlot {
    provider: Arc<dyn LlmProvider>,
    max_retries: u32,
}

/// Tries providers in priority order, retrying each slot with backoff
/// before falling through to the next. Rate-limited responses are not
/// retried within a slot — they fall through immediately.
pub struct ProviderRouter {
    slots: Vec<ProviderSlot>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>, max_retries: u32) -> Self {
        self.slots.push(ProviderSlot { provider, max_retries });
        self
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn generate(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams,
    ) -> Result<GenerateResult, ProviderError> {
        let mut last_error = ProviderError::Unavailable("no providers configured".into());

        for slot in &self.slots {
            let mut attempt = 0;
            loop {
                match slot.provider.generate(messages, params).await {
                    Ok(result) => return Ok(result),
                    Err(ProviderError::RateLimited { retry_after_ms }) => {
                        warn!(provider = slot.provider.name(), retry_after_ms, "rate limited, skipping to next provider");
                        last_error = ProviderError::RateLimited { retry_after_ms };
                        break;
                    }
                    Err(e) => {
                        last_error = e;
                        attempt += 1;
                        if attempt > slot.max_retries {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn stream(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams,
        tx: mpsc::Sender<StreamItem>,
    ) -> Result<(), ProviderError> {
        let mut last_error = ProviderError::Unavailable("no providers configured".into());

        for slot in &self.slots {
            let mut attempt = 0;
            loop {
                match slot.provider.stream(messages, params, tx.clone()).await {
                    Ok(()) => return Ok(()),
                    Err(ProviderError::RateLimited { retry_after_ms }) => {
                        warn!(provider = slot.provider.name(), retry_after_ms, "rate limited, skipping to next provider");
                        last_error = ProviderError::RateLimited { retry_after_ms };
                        break;
                    }
                    Err(e) => {
                        last_error = e;
                        attempt += 1;
                        if attempt > slot.max_retries {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFail;
    struct AlwaysOk;

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always_fail"
        }

        async fn generate(
            &self,
            _messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            Err(ProviderError::Unavailable("boom".into()))
        }
    }

    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always_ok"
        }

        async fn generate(
            &self,
            _messages: &[ProviderMessage],
            _params: &GenerationParams,
        ) -> Result<GenerateResult, ProviderError> {
            Ok(GenerateResult {
                content: "fine".into(),
                usage: Default::default(),
                stop_reason: "stop".into(),
                tool_calls: vec![],
            })
        }
    }

    fn dummy_request() -> (Vec<ProviderMessage>, GenerationParams) {
        (
            vec![ProviderMessage { role: loom_core::Role::User, content: "hi".into() }],
            GenerationParams::default(),
        )
    }

    #[tokio::test]
    async fn router_falls_back_to_second_provider() {
        let router = ProviderRouter::new()
            .with_provider(Arc::new(AlwaysFail), 0)
            .with_provider(Arc::new(AlwaysOk), 0);

        let (messages, params) = dummy_request();
        let result = router.generate(&messages, &params).await.unwrap();
        assert_eq!(result.content, "fine");
    }

    #[tokio::test]
    async fn router_errors_when_all_fail() {
        let router = ProviderRouter::new()
            .with_provider(Arc::new(AlwaysFail), 0)
            .with_provider(Arc::new(AlwaysFail), 0);

        let (messages, params) = dummy_request();
        let err = router.generate(&messages, &params).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
