//! Scripted completion provider for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CompletionProvider, ProviderError};

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Always reply with this text
    Reply(String),
    /// Always fail as if the service were down
    Failing,
}

#[derive(Debug)]
pub struct MockProvider {
    behavior: MockBehavior,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<(String, f32)>>,
}

impl MockProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(MockBehavior::Reply(text.into()))
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<(String, f32)> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some((prompt.to_string(), temperature));

        match &self.behavior {
            MockBehavior::Reply(text) => Ok(text.clone()),
            MockBehavior::Failing => Err(ProviderError::ApiError {
                status_code: 503,
                message: "service unavailable".into(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
