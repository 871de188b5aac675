//! Scripted collaborators for engine tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, Completion, CompletionClient, Usage};
use crate::display::Reporter;
use crate::report::BenchmarkResult;
use crate::snapshot::LiveStats;

#[derive(Debug, Clone)]
enum Behavior {
    Fail(String),
    Empty,
    Panic,
}

pub(crate) struct MockClient {
    latency: Duration,
    models: Result<Vec<String>, u16>,
    behaviors: HashMap<String, Behavior>,
    calls: AtomicUsize,
    list_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(1),
            models: Ok(vec!["mock-model".to_string()]),
            behaviors: HashMap::new(),
            calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = Ok(models.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Model discovery answers with this HTTP status.
    pub fn with_discovery_error(mut self, status: u16) -> Self {
        self.models = Err(status);
        self
    }

    pub fn failing_for(mut self, model: &str, message: &str) -> Self {
        self.behaviors
            .insert(model.to_string(), Behavior::Fail(message.to_string()));
        self
    }

    pub fn empty_for(mut self, model: &str) -> Self {
        self.behaviors.insert(model.to_string(), Behavior::Empty);
        self
    }

    pub fn panicking_for(mut self, model: &str) -> Self {
        self.behaviors.insert(model.to_string(), Behavior::Panic);
        self
    }

    /// Completion calls, streaming or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn respond(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
        streaming: bool,
    ) -> Result<Completion, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(prompt.to_string());

        let request_time = Instant::now();
        tokio::task::yield_now().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(self.latency) => {}
        }

        match self.behaviors.get(model) {
            Some(Behavior::Fail(message)) => Err(ClientError::Http5xx {
                status: 500,
                message: message.clone(),
            }),
            Some(Behavior::Empty) => Err(ClientError::EmptyResponse),
            Some(Behavior::Panic) => panic!("mock worker panic for {model}"),
            None => Ok(Completion {
                request_time,
                response_time: Instant::now(),
                ttft: streaming.then(|| request_time.elapsed() / 2),
                usage: Usage {
                    prompt_tokens: 5,
                    completion_tokens: 10,
                },
                content: "mock reply".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        match &self.models {
            Ok(models) => Ok(models.clone()),
            Err(status) => Err(ClientError::Http5xx {
                status: *status,
                message: "discovery unavailable".to_string(),
            }),
        }
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError> {
        self.respond(cancel, model, prompt, false).await
    }

    async fn complete_streaming(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
    ) -> Result<Completion, ClientError> {
        self.respond(cancel, model, prompt, true).await
    }
}

/// Reporter that keeps every event for later assertions.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<String>>,
    ticks: Mutex<Vec<LiveStats>>,
    results: Mutex<Option<Vec<BenchmarkResult>>>,
}

impl RecordingReporter {
    fn push(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn ticks(&self) -> Vec<LiveStats> {
        self.ticks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn results(&self) -> Option<Vec<BenchmarkResult>> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }
}

impl Reporter for RecordingReporter {
    fn run_started(&self, target: &str, models: &[String]) {
        self.push(format!("run {} [{}]", target, models.join(",")));
    }

    fn model_started(&self, model: &str) {
        self.push(format!("model {}", model));
    }

    fn status(&self, message: &str) {
        self.push(format!("status {}", message));
    }

    fn error(&self, message: &str) {
        self.push(format!("error {}", message));
    }

    fn progress_started(&self, duration: Duration) {
        self.push(format!("progress started {:?}", duration));
    }

    fn progress(&self, stats: &LiveStats) {
        self.ticks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(*stats);
    }

    fn progress_finished(&self) {
        self.push("progress finished".to_string());
    }

    fn results(&self, results: &[BenchmarkResult]) -> Result<()> {
        *self
            .results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(results.to_vec());
        Ok(())
    }
}
