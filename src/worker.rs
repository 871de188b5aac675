use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, Completion, CompletionClient};
use crate::metrics::{ErrorType, Metrics};
use crate::prompts::PromptSet;
use crate::stats::{RequestOutcome, StatsAggregator};

/// Issues requests back to back for one model until cancelled.
///
/// Each worker keeps its own prompt rotation, so prompt order is
/// deterministic per worker regardless of how many run in parallel.
pub struct Worker {
    id: usize,
    client: Arc<dyn CompletionClient>,
    model: String,
    prompts: PromptSet,
    streaming: bool,
    stats: Arc<StatsAggregator>,
    instrumented: bool,
}

impl Worker {
    pub fn new(
        id: usize,
        client: Arc<dyn CompletionClient>,
        model: impl Into<String>,
        prompts: PromptSet,
        streaming: bool,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            id,
            client,
            model: model.into(),
            prompts,
            streaming,
            stats,
            instrumented: false,
        }
    }

    /// Also feed the process-wide metrics registry.
    pub fn instrumented(mut self, instrumented: bool) -> Self {
        self.instrumented = instrumented;
        self
    }

    /// Runs until `cancel` fires. Returns the number of recorded requests.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut rotation = self.prompts.rotation();
        let mut recorded = 0;

        while !cancel.is_cancelled() {
            let prompt = rotation.next_prompt();

            if self.instrumented {
                Metrics::record_request_sent();
            }

            let result = if self.streaming {
                self.client
                    .complete_streaming(&cancel, &self.model, prompt)
                    .await
            } else {
                self.client.complete(&cancel, &self.model, prompt).await
            };

            // every issued request yields exactly one outcome, including the
            // one cut short by the deadline or an interrupt
            let cancelled = matches!(result, Err(ClientError::Cancelled));

            if self.instrumented {
                instrument(&result);
            }
            if let Err(e) = &result {
                debug!("worker {} request to {} failed: {}", self.id, self.model, e);
            }

            self.stats.record(RequestOutcome::from(result));
            recorded += 1;

            if cancelled {
                break;
            }
        }

        debug!(
            "worker {} for {} stopped after {} requests",
            self.id, self.model, recorded
        );
        recorded
    }
}

fn instrument(result: &Result<Completion, ClientError>) {
    match result {
        Ok(completion) => Metrics::record_success(
            completion.latency(),
            completion.ttft,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        ),
        Err(ClientError::Cancelled) => Metrics::record_cancelled(),
        Err(e) => Metrics::record_failure(ErrorType::from(e)),
    }
}
