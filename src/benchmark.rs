use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::CompletionClient;
use crate::concurrency::{ConcurrencyStrategy, SingleConcurrency};
use crate::config::Config;
use crate::display::Reporter;
use crate::error::BenchError;
use crate::orchestrator::{Orchestrator, RunSettings};
use crate::prompts::PromptSet;
use crate::report::BenchmarkResult;

/// Drives a whole benchmark run against one server.
///
/// The runner resolves the models to test, benchmarks them one after another
/// and hands the collected results to the [`Reporter`]:
/// - explicit models are used as given and discovery is never called
/// - otherwise the server is asked for its models, unless discovery is
///   disabled, which is a configuration error without explicit models
/// - a model that fails is reported and skipped
/// - cancellation stops the run before the next model
///
/// # Examples
///
/// ```no_run
/// use aibench::{BenchmarkRunner, ClientConfig, Config, ConsoleReporter, OpenAIClient};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(config: Config) -> anyhow::Result<()> {
/// let client = OpenAIClient::new(ClientConfig {
///     base_url: config.endpoint.server_url.clone(),
///     api_key: config.endpoint.api_key.clone(),
///     timeout: config.endpoint.timeout,
///     max_tokens: config.endpoint.max_tokens,
///     temperature: config.endpoint.temperature,
///     pool_size: config.endpoint.pool_size,
/// })?;
/// let reporter = ConsoleReporter::new(config.output.format, None, true);
/// let runner = BenchmarkRunner::new(config, Arc::new(client), Arc::new(reporter));
/// let results = runner.run(&CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkRunner {
    config: Config,
    client: Arc<dyn CompletionClient>,
    reporter: Arc<dyn Reporter>,
    strategy: Arc<dyn ConcurrencyStrategy>,
    progress_interval: Duration,
}

impl BenchmarkRunner {
    pub fn new(
        config: Config,
        client: Arc<dyn CompletionClient>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            client,
            reporter,
            strategy: Arc::new(SingleConcurrency),
            progress_interval: Duration::from_secs(1),
        }
    }

    /// Replaces the strategy used when concurrency is set to auto.
    pub fn with_strategy(mut self, strategy: Arc<dyn ConcurrencyStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    fn run_settings(&self) -> RunSettings {
        RunSettings {
            duration: self.config.load.duration,
            warmup: self.config.load.warmup,
            concurrency: self.config.concurrency(),
            streaming: self.config.load.streaming,
            prompts: PromptSet::for_size(self.config.load.prompt_size),
            progress_interval: self.progress_interval,
        }
    }

    /// The models this run will benchmark, in order.
    pub async fn resolve_models(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BenchError> {
        let explicit = &self.config.models.names;
        if !explicit.is_empty() {
            debug!("Using {} models from configuration", explicit.len());
            return Ok(explicit.clone());
        }

        if self.config.models.skip_discovery {
            return Err(BenchError::Configuration(
                "model discovery is disabled but no models were specified (use --models)"
                    .to_string(),
            ));
        }

        info!("Models not specified, querying server for available models");
        let models = self.client.list_models(cancel).await?;
        if models.is_empty() {
            return Err(BenchError::NoModels);
        }
        debug!("Discovered models: {}", models.join(", "));
        Ok(models)
    }

    /// Benchmarks every resolved model and reports the results.
    ///
    /// Results are handed to the reporter even when the run was interrupted or
    /// every model failed. Only model resolution and reporting itself fail the
    /// whole run.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<BenchmarkResult>, BenchError> {
        let models = self.resolve_models(cancel).await?;
        self.reporter
            .run_started(&self.config.endpoint.server_url, &models);

        let mut orchestrator = Orchestrator::new(
            Arc::clone(&self.client),
            Arc::clone(&self.reporter),
            Arc::clone(&self.strategy),
            self.run_settings(),
        );

        let mut results = Vec::with_capacity(models.len());
        for model in &models {
            if cancel.is_cancelled() {
                info!("Benchmark interrupted, skipping remaining models");
                break;
            }

            self.reporter.model_started(model);
            match orchestrator.benchmark_model(model, cancel).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("{}", e);
                    self.reporter.error(&e.to_string());
                }
            }
        }

        self.reporter
            .results(&results)
            .map_err(|e| BenchError::Report(format!("{:#}", e)))?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockClient, RecordingReporter};

    fn config(models: &[&str], skip_discovery: bool) -> Config {
        let mut config = Config::default();
        config.endpoint.server_url = "localhost:8000".to_string();
        config.load.duration = Duration::from_millis(60);
        config.load.warmup = Duration::ZERO;
        config.load.concurrency = 2;
        config.models.names = models.iter().map(|m| m.to_string()).collect();
        config.models.skip_discovery = skip_discovery;
        config
    }

    fn runner(
        config: Config,
        client: &Arc<MockClient>,
        reporter: &Arc<RecordingReporter>,
    ) -> BenchmarkRunner {
        let client: Arc<dyn CompletionClient> = client.clone();
        let reporter: Arc<dyn Reporter> = reporter.clone();
        BenchmarkRunner::new(config, client, reporter)
            .with_progress_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_explicit_models_skip_discovery() {
        let client = Arc::new(MockClient::new().with_models(&["discovered"]));
        let reporter = Arc::new(RecordingReporter::default());
        let runner = runner(config(&["a", "b"], false), &client, &reporter);

        let results = runner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(client.list_calls(), 0);
        let models: Vec<&str> = results.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, ["a", "b"]);
        assert!(reporter.has_event("run localhost:8000 [a,b]"));
        assert_eq!(reporter.results().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skip_discovery_without_models() {
        let client = Arc::new(MockClient::new());
        let reporter = Arc::new(RecordingReporter::default());
        let runner = runner(config(&[], true), &client, &reporter);

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, BenchError::Configuration(_)));
        assert!(err.is_fatal());
        assert_eq!(client.list_calls(), 0);
        assert_eq!(client.calls(), 0);
        assert!(reporter.results().is_none());
    }

    #[tokio::test]
    async fn test_discovered_models_are_benchmarked() {
        let client = Arc::new(MockClient::new().with_models(&["x", "y"]));
        let reporter = Arc::new(RecordingReporter::default());
        let runner = runner(config(&[], false), &client, &reporter);

        let results = runner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(client.list_calls(), 1);
        assert_eq!(results.len(), 2);
        assert!(reporter.has_event("model x"));
        assert!(reporter.has_event("model y"));
    }

    #[tokio::test]
    async fn test_discovery_failures_abort() {
        let client = Arc::new(MockClient::new().with_discovery_error(503));
        let reporter = Arc::new(RecordingReporter::default());
        let err = runner(config(&[], false), &client, &reporter)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Discovery(_)));
        assert_eq!(client.calls(), 0);

        let client = Arc::new(MockClient::new().with_models(&[]));
        let err = runner(config(&[], false), &client, &reporter)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::NoModels));
    }

    #[tokio::test]
    async fn test_failed_model_is_skipped() {
        let client = Arc::new(MockClient::new().panicking_for("broken"));
        let reporter = Arc::new(RecordingReporter::default());
        let runner = runner(config(&["broken", "fine"], false), &client, &reporter);

        let results = runner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].model, "fine");
        assert!(
            reporter
                .events()
                .iter()
                .any(|e| e.starts_with("error benchmark of model broken failed"))
        );
    }

    #[tokio::test]
    async fn test_failing_requests_still_produce_results() {
        let client = Arc::new(MockClient::new().failing_for("m", "boom").empty_for("e"));
        let reporter = Arc::new(RecordingReporter::default());
        let runner = runner(config(&["m", "e"], false), &client, &reporter);

        let results = runner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].total_requests > 0);
        assert_eq!(results[0].error_rate, 100.0);
        assert_eq!(results[0].errors[0].message, "HTTP 500 server error: boom");
        assert_eq!(results[1].errors[0].message, "empty response");
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_partial_results() {
        let client = Arc::new(MockClient::new());
        let reporter = Arc::new(RecordingReporter::default());
        let runner = runner(config(&["a", "b", "c"], false), &client, &reporter);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = runner.run(&cancel).await.unwrap();

        assert!(results.is_empty());
        assert_eq!(client.calls(), 0);
        assert_eq!(reporter.results(), Some(Vec::new()));
    }
}
