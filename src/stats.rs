//! Thread-safe aggregation of request outcomes for one model run.
//!
//! Workers call [`StatsAggregator::record`] concurrently while the progress
//! loop polls [`StatsAggregator::counters`]. Both hold the lock only for a few
//! arithmetic operations. [`StatsAggregator::stats`] copies the samples under
//! the shared lock and sorts them after releasing it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::client::{ClientError, Completion};

/// Tally label for exchanges that produced no response at all.
pub const EMPTY_RESPONSE: &str = "empty response";

/// Error messages longer than this many characters are truncated.
const MAX_ERROR_LEN: usize = 100;

/// The result of exactly one request, carrying its own timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success {
        request_time: Instant,
        response_time: Instant,
        ttft: Option<Duration>,
        input_tokens: u64,
        output_tokens: u64,
    },
    Failure {
        message: String,
    },
    NoResponse,
}

impl RequestOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        RequestOutcome::Failure {
            message: message.into(),
        }
    }
}

impl From<Completion> for RequestOutcome {
    fn from(completion: Completion) -> Self {
        RequestOutcome::Success {
            request_time: completion.request_time,
            response_time: completion.response_time,
            ttft: completion.ttft,
            input_tokens: completion.usage.prompt_tokens,
            output_tokens: completion.usage.completion_tokens,
        }
    }
}

impl From<Result<Completion, ClientError>> for RequestOutcome {
    fn from(result: Result<Completion, ClientError>) -> Self {
        match result {
            Ok(completion) => completion.into(),
            Err(ClientError::EmptyResponse) => RequestOutcome::NoResponse,
            Err(e) => RequestOutcome::failure(e.to_string()),
        }
    }
}

#[derive(Debug)]
struct AggregatorState {
    start_time: Instant,
    request_latencies: Vec<Duration>,
    ttft_latencies: Vec<Duration>,
    total: u64,
    successes: u64,
    failures: u64,
    errors: HashMap<String, u64>,
    input_token_sum: u64,
    output_token_sum: u64,
}

impl AggregatorState {
    fn new(start_time: Instant) -> Self {
        Self {
            start_time,
            request_latencies: Vec::new(),
            ttft_latencies: Vec::new(),
            total: 0,
            successes: 0,
            failures: 0,
            errors: HashMap::new(),
            input_token_sum: 0,
            output_token_sum: 0,
        }
    }
}

/// Raw counters for the live progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub start_time: Instant,
    pub total: u64,
    pub successes: u64,
    /// Input plus output tokens of all successful requests
    pub tokens: u64,
}

/// Avg/min/max and tail percentiles over a set of durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Summarizes unsorted samples. An empty slice gives all zeros.
    pub fn from_samples(samples: &[Duration]) -> Self {
        Self::from_sorted(sort(samples.to_vec()))
    }

    /// Summarizes samples already in ascending order.
    pub fn from_sorted(sorted: Vec<Duration>) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }

        let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
        let avg = Duration::from_nanos((total / sorted.len() as u128) as u64);

        Self {
            count: sorted.len(),
            avg,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

fn sort(mut samples: Vec<Duration>) -> Vec<Duration> {
    samples.sort_unstable();
    samples
}

/// Nearest-rank percentile of an ascending slice.
///
/// The index is `floor(n * p / 100)` clamped to the last element, so small
/// samples report their maximum for high percentiles.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let index = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Derived statistics for one model run.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Failed requests as a percentage of all requests
    pub error_rate: f64,
    pub requests_per_second: f64,
    pub latency: LatencySummary,
    pub ttft: LatencySummary,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub input_tokens_per_second: f64,
    pub output_tokens_per_second: f64,
    pub tokens_per_second: f64,
    pub errors: HashMap<String, u64>,
}

impl StatsSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() > MAX_ERROR_LEN {
        let head: String = message.chars().take(MAX_ERROR_LEN).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

#[derive(Debug)]
pub struct StatsAggregator {
    state: RwLock<AggregatorState>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AggregatorState::new(Instant::now())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AggregatorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AggregatorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears everything and restarts the clock.
    pub fn reset(&self) {
        *self.write() = AggregatorState::new(Instant::now());
    }

    pub fn record(&self, outcome: RequestOutcome) {
        let mut state = self.write();
        state.total += 1;

        match outcome {
            RequestOutcome::Success {
                request_time,
                response_time,
                ttft,
                input_tokens,
                output_tokens,
            } => {
                state.successes += 1;
                state
                    .request_latencies
                    .push(response_time.saturating_duration_since(request_time));
                if let Some(ttft) = ttft
                    && !ttft.is_zero()
                {
                    state.ttft_latencies.push(ttft);
                }
                state.input_token_sum += input_tokens;
                state.output_token_sum += output_tokens;
            }
            RequestOutcome::Failure { message } => {
                state.failures += 1;
                *state.errors.entry(truncate_message(&message)).or_insert(0) += 1;
            }
            RequestOutcome::NoResponse => {
                state.failures += 1;
                *state.errors.entry(EMPTY_RESPONSE.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn counters(&self) -> Counters {
        let state = self.read();
        Counters {
            start_time: state.start_time,
            total: state.total,
            successes: state.successes,
            tokens: state.input_token_sum + state.output_token_sum,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats_at(Instant::now())
    }

    /// Statistics as of `now`, which only affects elapsed time and rates.
    pub fn stats_at(&self, now: Instant) -> StatsSnapshot {
        let (mut snapshot, latencies, ttfts) = {
            let state = self.read();
            let elapsed = now.saturating_duration_since(state.start_time);

            let error_rate = if state.total > 0 {
                state.failures as f64 / state.total as f64 * 100.0
            } else {
                0.0
            };

            let snapshot = StatsSnapshot {
                elapsed,
                total_requests: state.total,
                successful_requests: state.successes,
                failed_requests: state.failures,
                error_rate,
                requests_per_second: rate(state.successes, elapsed),
                latency: LatencySummary::default(),
                ttft: LatencySummary::default(),
                total_input_tokens: state.input_token_sum,
                total_output_tokens: state.output_token_sum,
                input_tokens_per_second: rate(state.input_token_sum, elapsed),
                output_tokens_per_second: rate(state.output_token_sum, elapsed),
                tokens_per_second: rate(state.input_token_sum + state.output_token_sum, elapsed),
                errors: state.errors.clone(),
            };
            (
                snapshot,
                state.request_latencies.clone(),
                state.ttft_latencies.clone(),
            )
        };

        snapshot.latency = LatencySummary::from_sorted(sort(latencies));
        snapshot.ttft = LatencySummary::from_sorted(sort(ttfts));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn success(base: Instant, latency_ms: u64, ttft_ms: Option<u64>) -> RequestOutcome {
        RequestOutcome::Success {
            request_time: base,
            response_time: base + Duration::from_millis(latency_ms),
            ttft: ttft_ms.map(Duration::from_millis),
            input_tokens: 10,
            output_tokens: 20,
        }
    }

    #[test]
    fn test_three_successes_one_failure() {
        let stats = StatsAggregator::new();
        let base = Instant::now();
        stats.record(success(base, 100, None));
        stats.record(success(base, 200, None));
        stats.record(success(base, 300, None));
        stats.record(RequestOutcome::failure("timeout"));

        let snapshot = stats.stats();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.successful_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.error_rate, 25.0);
        assert_eq!(snapshot.latency.avg, Duration::from_millis(200));
        assert_eq!(snapshot.latency.min, Duration::from_millis(100));
        assert_eq!(snapshot.latency.max, Duration::from_millis(300));
        assert_eq!(snapshot.latency.p95, Duration::from_millis(300));
        assert_eq!(snapshot.latency.p99, Duration::from_millis(300));
        assert_eq!(snapshot.errors.get("timeout"), Some(&1));
        assert_eq!(snapshot.total_input_tokens, 30);
        assert_eq!(snapshot.total_output_tokens, 60);
    }

    #[test]
    fn test_empty_aggregator() {
        let stats = StatsAggregator::new();
        let snapshot = stats.stats();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.latency, LatencySummary::default());
        assert_eq!(snapshot.ttft, LatencySummary::default());
        assert!(snapshot.errors.is_empty());
    }

    #[test]
    fn test_zero_elapsed_rates() {
        let stats = StatsAggregator::new();
        let start = stats.counters().start_time;
        stats.record(success(start, 5, None));

        let snapshot = stats.stats_at(start);
        assert_eq!(snapshot.requests_per_second, 0.0);
        assert_eq!(snapshot.tokens_per_second, 0.0);

        let snapshot = stats.stats_at(start + Duration::from_secs(2));
        assert_eq!(snapshot.requests_per_second, 0.5);
        assert_eq!(snapshot.tokens_per_second, 15.0);
        assert_eq!(snapshot.input_tokens_per_second, 5.0);
        assert_eq!(snapshot.output_tokens_per_second, 10.0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let stats = StatsAggregator::new();
        stats.record(success(Instant::now(), 10, Some(2)));
        stats.record(RequestOutcome::NoResponse);

        stats.reset();
        let first = stats.counters();
        stats.reset();
        let second = stats.counters();

        assert_eq!(first.total, 0);
        assert_eq!(second.total, 0);
        assert_eq!(second.tokens, 0);
        assert!(second.start_time >= first.start_time);
        assert!(stats.stats().errors.is_empty());
    }

    #[test]
    fn test_error_message_truncation() {
        let stats = StatsAggregator::new();
        let long = "x".repeat(250);
        stats.record(RequestOutcome::failure(long.clone()));
        stats.record(RequestOutcome::failure(long));
        stats.record(RequestOutcome::failure("y".repeat(100)));

        let errors = stats.stats().errors;
        let truncated = format!("{}...", "x".repeat(100));
        assert_eq!(errors.get(&truncated), Some(&2));
        assert_eq!(errors.get(&"y".repeat(100)), Some(&1));
    }

    #[test]
    fn test_no_response_sentinel() {
        let stats = StatsAggregator::new();
        stats.record(RequestOutcome::NoResponse);
        stats.record(RequestOutcome::from(Err::<Completion, _>(
            ClientError::EmptyResponse,
        )));

        let snapshot = stats.stats();
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.errors.get(EMPTY_RESPONSE), Some(&2));
    }

    #[test]
    fn test_ttft_only_when_positive() {
        let stats = StatsAggregator::new();
        let base = Instant::now();
        stats.record(success(base, 50, None));
        stats.record(success(base, 50, Some(0)));
        stats.record(success(base, 50, Some(12)));

        let snapshot = stats.stats();
        assert_eq!(snapshot.latency.count, 3);
        assert_eq!(snapshot.ttft.count, 1);
        assert_eq!(snapshot.ttft.avg, Duration::from_millis(12));
    }

    #[test]
    fn test_percentile_index() {
        let sorted: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&sorted, 95.0), Duration::from_millis(96));
        assert_eq!(percentile(&sorted, 99.0), Duration::from_millis(100));
        assert_eq!(percentile(&sorted, 100.0), Duration::from_millis(100));
        assert_eq!(percentile(&[], 99.0), Duration::ZERO);
    }

    #[test]
    fn test_percentile_ordering_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(1..500);
            let samples: Vec<Duration> = (0..len)
                .map(|_| Duration::from_micros(rng.gen_range(0..5_000_000)))
                .collect();
            let summary = LatencySummary::from_samples(&samples);
            assert!(summary.min <= summary.p95);
            assert!(summary.p95 <= summary.p99);
            assert!(summary.p99 <= summary.max);
            assert!(summary.min <= summary.avg && summary.avg <= summary.max);
        }
    }

    #[test]
    fn test_snapshots_consistent_while_recording() {
        let stats = StatsAggregator::new();
        let base = Instant::now();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut rng = rand::thread_rng();
                    for _ in 0..1_000 {
                        stats.record(success(base, rng.gen_range(1..100), None));
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..200 {
                    let snapshot = stats.stats();
                    assert_eq!(snapshot.latency.count as u64, snapshot.successful_requests);
                    assert_eq!(snapshot.total_input_tokens, snapshot.successful_requests * 10);
                    assert_eq!(snapshot.total_output_tokens, snapshot.successful_requests * 20);
                    assert!(snapshot.latency.min <= snapshot.latency.max);
                }
            });
        });

        let snapshot = stats.stats();
        assert_eq!(snapshot.total_requests, 4_000);
        assert_eq!(snapshot.total_tokens(), 4_000 * 30);
    }

    #[test]
    fn test_concurrent_recording() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2_000;

        let stats = StatsAggregator::new();
        let base = Instant::now();

        let failures: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        let mut rng = rand::thread_rng();
                        let mut failed = 0;
                        for _ in 0..PER_THREAD {
                            if rng.gen_bool(0.3) {
                                stats.record(RequestOutcome::failure("boom"));
                                failed += 1;
                            } else {
                                stats.record(success(base, rng.gen_range(1..100), Some(1)));
                            }
                            if rng.gen_bool(0.01) {
                                std::thread::yield_now();
                            }
                        }
                        failed
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let snapshot = stats.stats();
        let total = (THREADS * PER_THREAD) as u64;
        assert_eq!(snapshot.total_requests, total);
        assert_eq!(snapshot.failed_requests, failures as u64);
        assert_eq!(
            snapshot.successful_requests + snapshot.failed_requests,
            snapshot.total_requests
        );
        assert_eq!(snapshot.latency.count as u64, snapshot.successful_requests);
        assert_eq!(snapshot.errors.get("boom").copied().unwrap_or(0), failures as u64);
    }
}
