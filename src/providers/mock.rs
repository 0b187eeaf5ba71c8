/*!
 * Mock provider for tests and dry runs.
 *
 * Outcomes can be scripted per call, or bound to source text containing a
 * given substring. Every call is recorded with its text, context and the
 * (tokio) instant at which it was made, so tests can assert on ordering,
 * skipped work and backoff timing.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::ProviderError;
use crate::providers::Provider;
use crate::translation::validation::{length_validation, TranslationValidation};

/// What a single mock call does
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with the default transformation
    Translate,
    /// Succeed with this exact text
    Text(String),
    /// Fail with this error
    Fail(ProviderError),
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub text: String,
    pub context: Option<String>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    /// Consumed in order, one per call, before rules apply
    script: VecDeque<MockOutcome>,
    /// Applied to every call whose text contains the needle
    rules: Vec<(String, MockOutcome)>,
    calls: Vec<MockCall>,
    /// Returned by every `validate` call when set
    validation_error: Option<ProviderError>,
    validation_calls: usize,
}

/// Mock provider for testing translation behavior
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Prefix of the default transformation
    prefix: String,
    /// Simulated latency per call
    delay: Option<Duration>,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::working()
    }
}

impl MockProvider {
    /// Create a working mock provider that prefixes text with `[mock] `
    pub fn working() -> Self {
        Self::with_prefix("[mock] ")
    }

    /// Create a working mock provider with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delay: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock provider whose every call fails with `error`
    pub fn failing(error: ProviderError) -> Self {
        Self::working().fail_when_contains("", error)
    }

    /// Queue outcomes for the next calls, in order
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.state.lock().script.extend(outcomes);
        self
    }

    /// Fail every call whose text contains `needle`
    pub fn fail_when_contains(self, needle: impl Into<String>, error: ProviderError) -> Self {
        self.state
            .lock()
            .rules
            .push((needle.into(), MockOutcome::Fail(error)));
        self
    }

    /// Answer `text` to every call whose source contains `needle`
    pub fn respond_when_contains(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.state
            .lock()
            .rules
            .push((needle.into(), MockOutcome::Text(text.into())));
        self
    }

    /// Fail every `validate` call with `error`
    pub fn fail_validation(self, error: ProviderError) -> Self {
        self.state.lock().validation_error = Some(error);
        self
    }

    /// Simulate latency on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The default transformation applied to successful calls
    pub fn transform(&self, text: &str) -> String {
        format!("{}{}", self.prefix, text)
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of `validate` calls made so far
    pub fn validation_count(&self) -> usize {
        self.state.lock().validation_calls
    }

    /// Texts of every call made so far
    pub fn call_texts(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|c| c.text.clone()).collect()
    }

    fn next_outcome(&self, text: &str, context: Option<&str>) -> MockOutcome {
        let mut state = self.state.lock();
        state.calls.push(MockCall {
            text: text.to_string(),
            context: context.map(str::to_string),
            at: Instant::now(),
        });

        if let Some(outcome) = state.script.pop_front() {
            return outcome;
        }
        state
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or(MockOutcome::Translate)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate(&self, text: &str, context: Option<&str>) -> Result<String, ProviderError> {
        let outcome = self.next_outcome(text, context);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            MockOutcome::Translate => Ok(self.transform(text)),
            MockOutcome::Text(text) => Ok(text),
            MockOutcome::Fail(error) => Err(error),
        }
    }

    async fn validate(&self, source: &str, translated: &str) -> Result<TranslationValidation, ProviderError> {
        let mut state = self.state.lock();
        state.validation_calls += 1;
        match &state.validation_error {
            Some(error) => Err(error.clone()),
            None => Ok(length_validation(source, translated)),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
