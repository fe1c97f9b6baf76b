//! Scripted providers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// Replies from a script, then from a fallback forever.
pub(crate) struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Result<String, ProviderError>,
    usage: TokenUsage,
    model: String,
    delay: Option<Duration>,
    calls: AtomicU32,
    healthy: AtomicBool,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    fn with_fallback(name: &str, fallback: Result<String, ProviderError>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            usage: TokenUsage::new(100, 50),
            model: format!("{name}-model"),
            delay: None,
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(name: &str, reply: &str) -> Self {
        Self::with_fallback(name, Ok(reply.to_string()))
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self::with_fallback(name, Err(ProviderError::HttpError(format!("{name} is down"))))
    }

    /// Queue a reply ahead of the fallback.
    pub(crate) fn then(self, reply: Result<String, ProviderError>) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Conversations received, in call order.
    pub(crate) fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(messages);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map(|content| CompletionResponse::new(content, self.model.clone(), self.usage))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
