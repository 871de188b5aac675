//! Per-model benchmark state machine.
//!
//! `Idle -> ConcurrencyDecision -> Warmup? -> Measuring -> Finalized -> Idle`
//!
//! Each phase runs under a child of the caller's cancellation token, so an
//! interrupt stops warmup and measurement alike while a phase deadline never
//! leaks into the rest of the run.

use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::CompletionClient;
use crate::concurrency::{ConcurrencySetting, ConcurrencyStrategy, decide_concurrency};
use crate::display::Reporter;
use crate::error::BenchError;
use crate::prompts::PromptSet;
use crate::report::BenchmarkResult;
use crate::snapshot::LiveSnapshot;
use crate::stats::StatsAggregator;
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ConcurrencyDecision,
    Warmup,
    Measuring,
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::ConcurrencyDecision => "concurrency-decision",
            Phase::Warmup => "warmup",
            Phase::Measuring => "measuring",
            Phase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// What every model run needs, resolved once from the configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub duration: Duration,
    /// Zero disables the warmup phase
    pub warmup: Duration,
    pub concurrency: ConcurrencySetting,
    pub streaming: bool,
    pub prompts: PromptSet,
    /// Spacing of progress ticks during measurement
    pub progress_interval: Duration,
}

pub struct Orchestrator {
    client: Arc<dyn CompletionClient>,
    reporter: Arc<dyn Reporter>,
    strategy: Arc<dyn ConcurrencyStrategy>,
    settings: RunSettings,
    stats: Arc<StatsAggregator>,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        reporter: Arc<dyn Reporter>,
        strategy: Arc<dyn ConcurrencyStrategy>,
        settings: RunSettings,
    ) -> Self {
        Self {
            client,
            reporter,
            strategy,
            settings,
            stats: Arc::new(StatsAggregator::new()),
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, model: &str, next: Phase) {
        debug!("{}: {} -> {}", model, self.phase, next);
        self.phase = next;
    }

    /// Benchmarks one model. Always returns to [`Phase::Idle`].
    pub async fn benchmark_model(
        &mut self,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<BenchmarkResult, BenchError> {
        let result = self.run_phases(model, cancel).await;
        self.transition(model, Phase::Idle);
        result
    }

    async fn run_phases(
        &mut self,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<BenchmarkResult, BenchError> {
        self.transition(model, Phase::ConcurrencyDecision);
        let decision = decide_concurrency(
            self.settings.concurrency,
            self.strategy.as_ref(),
            model,
            cancel,
        )
        .await
        .map_err(|e| BenchError::Benchmark {
            model: model.to_string(),
            reason: format!("{:#}", e),
        })?;
        if let Some(notice) = &decision.notice {
            self.reporter.status(notice);
        }
        let concurrency = decision.concurrency;

        if !self.settings.warmup.is_zero() && !cancel.is_cancelled() {
            self.transition(model, Phase::Warmup);
            if let Err(e) = self.warmup(model, concurrency, cancel).await {
                warn!("{}", e);
                self.reporter.error(&e.to_string());
            }
        }

        self.transition(model, Phase::Measuring);
        self.measure(model, concurrency, cancel).await?;

        self.transition(model, Phase::Finalized);
        let snapshot = self.stats.stats();
        info!(
            "{}: {} requests ({} failed) in {:.1}s",
            model,
            snapshot.total_requests,
            snapshot.failed_requests,
            snapshot.elapsed.as_secs_f64()
        );
        Ok(BenchmarkResult::from_stats(model, concurrency, &snapshot))
    }

    async fn warmup(
        &self,
        model: &str,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        let warmup = self.settings.warmup;
        self.reporter.status(&format!(
            "Warming up for {}...",
            humantime::format_duration(warmup)
        ));

        // warmup traffic never reaches the measured aggregator
        let scratch = Arc::new(StatsAggregator::new());
        let phase = deadline_token(cancel, warmup);
        let joined = self
            .run_workers(model, concurrency, &scratch, &phase, false)
            .await;
        phase.cancel();

        let completed = joined.map_err(|e| BenchError::Warmup(e.to_string()))?;
        debug!("{}: warmup completed {} requests", model, completed);
        Ok(())
    }

    async fn measure(
        &self,
        model: &str,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        let duration = self.settings.duration;
        self.stats.reset();
        self.reporter.progress_started(duration);

        let phase = deadline_token(cancel, duration);
        let (stop_progress, progress) = self.spawn_progress();

        let joined = self
            .run_workers(model, concurrency, &self.stats, &phase, true)
            .await;
        phase.cancel();

        // the final tick sees every recorded outcome
        stop_progress.cancel();
        if let Err(e) = progress.await {
            warn!("progress task failed: {}", e);
        }
        self.reporter.progress_finished();

        let completed = joined.map_err(|e| BenchError::Benchmark {
            model: model.to_string(),
            reason: format!("worker task failed: {}", e),
        })?;
        debug!(
            "{}: {} workers recorded {} requests",
            model, concurrency, completed
        );
        Ok(())
    }

    fn spawn_progress(&self) -> (CancellationToken, JoinHandle<()>) {
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let reporter = Arc::clone(&self.reporter);
        let mut live = LiveSnapshot::new(Arc::clone(&self.stats));
        let period = self.settings.progress_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => reporter.progress(&live.live_stats()),
                }
            }
            reporter.progress(&live.live_stats());
        });

        (stop, handle)
    }

    /// Runs `concurrency` workers until `cancel` fires and joins all of them.
    ///
    /// A failed worker cancels its siblings; the first failure is returned
    /// once every worker has exited.
    async fn run_workers(
        &self,
        model: &str,
        concurrency: usize,
        stats: &Arc<StatsAggregator>,
        cancel: &CancellationToken,
        instrumented: bool,
    ) -> Result<u64, JoinError> {
        let mut workers = JoinSet::new();
        for id in 0..concurrency {
            let worker = Worker::new(
                id,
                Arc::clone(&self.client),
                model,
                self.settings.prompts.clone(),
                self.settings.streaming,
                Arc::clone(stats),
            )
            .instrumented(instrumented);
            workers.spawn(worker.run(cancel.clone()));
        }

        let mut completed = 0;
        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(count) => completed += count,
                Err(e) => {
                    cancel.cancel();
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }
}

/// A child of `parent` that also cancels itself after `limit`.
pub fn deadline_token(parent: &CancellationToken, limit: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(limit) => timer.cancel(),
        }
    });
    token
}
