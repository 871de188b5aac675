use metriken::{AtomicHistogram, Counter, LazyCounter, metric};
use std::time::Duration;

use crate::client::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Connection,
    Http4xx(u16),
    Http5xx(u16),
    Parse,
    Timeout,
    Other,
}

impl From<&ClientError> for ErrorType {
    fn from(error: &ClientError) -> Self {
        match error {
            ClientError::Connection(_) => ErrorType::Connection,
            ClientError::Http4xx { status, .. } => ErrorType::Http4xx(*status),
            ClientError::Http5xx { status, .. } => ErrorType::Http5xx(*status),
            ClientError::Parse(_) => ErrorType::Parse,
            ClientError::Timeout(_) => ErrorType::Timeout,
            ClientError::EmptyResponse | ClientError::Cancelled | ClientError::Other(_) => {
                ErrorType::Other
            }
        }
    }
}

// Metrics span the whole process, across every model benchmarked in a run.

// Request metrics
#[metric(
    name = "requests",
    description = "Total number of requests",
    metadata = { status = "sent" }
)]
pub static REQUESTS_SENT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Successful requests",
    metadata = { status = "success" }
)]
pub static REQUESTS_SUCCESS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Failed requests",
    metadata = { status = "failed" }
)]
pub static REQUESTS_FAILED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "requests",
    description = "Requests cut short by cancellation",
    metadata = { status = "cancelled" }
)]
pub static REQUESTS_CANCELLED: LazyCounter = LazyCounter::new(Counter::default);

// Error category metrics
#[metric(
    name = "errors",
    description = "Connection errors",
    metadata = { "type" = "connection" }
)]
pub static ERRORS_CONNECTION: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "HTTP 4xx errors",
    metadata = { "type" = "http_4xx" }
)]
pub static ERRORS_HTTP_4XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "HTTP 5xx errors",
    metadata = { "type" = "http_5xx" }
)]
pub static ERRORS_HTTP_5XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Parse errors",
    metadata = { "type" = "parse" }
)]
pub static ERRORS_PARSE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Timeouts",
    metadata = { "type" = "timeout" }
)]
pub static ERRORS_TIMEOUT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors",
    description = "Other errors",
    metadata = { "type" = "other" }
)]
pub static ERRORS_OTHER: LazyCounter = LazyCounter::new(Counter::default);

// Token metrics
#[metric(
    name = "tokens",
    description = "Input tokens processed",
    metadata = { direction = "input" }
)]
pub static TOKENS_INPUT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "tokens",
    description = "Output tokens generated",
    metadata = { direction = "output" }
)]
pub static TOKENS_OUTPUT: LazyCounter = LazyCounter::new(Counter::default);

// Latency metrics (in nanoseconds)
// Histogram parameters: (grouping_power=5, max_value_power=64)
#[metric(
    name = "ttft",
    description = "Time to first token in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static TTFT: AtomicHistogram = AtomicHistogram::new(5, 64);

#[metric(
    name = "request_latency",
    description = "Total request latency in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static REQUEST_LATENCY: AtomicHistogram = AtomicHistogram::new(5, 64);

/// Totals across every model benchmarked so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub requests_sent: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub latency_p50: Option<Duration>,
    pub latency_p99: Option<Duration>,
    pub ttft_p50: Option<Duration>,
    pub ttft_p99: Option<Duration>,
}

/// p50 and p99 of a histogram, if it has any samples.
fn p50_p99(histogram: &AtomicHistogram) -> (Option<Duration>, Option<Duration>) {
    let Some(snapshot) = histogram.load() else {
        return (None, None);
    };
    match snapshot.percentiles(&[50.0, 99.0]) {
        Ok(Some(percentiles)) if percentiles.len() >= 2 => (
            Some(Duration::from_nanos(percentiles[0].1.end())),
            Some(Duration::from_nanos(percentiles[1].1.end())),
        ),
        _ => (None, None),
    }
}

pub struct Metrics;

impl Metrics {
    pub fn record_request_sent() {
        REQUESTS_SENT.increment();
    }

    pub fn record_success(latency: Duration, ttft: Option<Duration>, input: u64, output: u64) {
        REQUESTS_SUCCESS.increment();
        TOKENS_INPUT.add(input);
        TOKENS_OUTPUT.add(output);
        let _ = REQUEST_LATENCY.increment(latency.as_nanos() as u64);
        if let Some(ttft) = ttft
            && !ttft.is_zero()
        {
            let _ = TTFT.increment(ttft.as_nanos() as u64);
        }
    }

    pub fn record_failure(error_type: ErrorType) {
        REQUESTS_FAILED.increment();
        match error_type {
            ErrorType::Connection => ERRORS_CONNECTION.increment(),
            ErrorType::Http4xx(_) => ERRORS_HTTP_4XX.increment(),
            ErrorType::Http5xx(_) => ERRORS_HTTP_5XX.increment(),
            ErrorType::Parse => ERRORS_PARSE.increment(),
            ErrorType::Timeout => ERRORS_TIMEOUT.increment(),
            ErrorType::Other => ERRORS_OTHER.increment(),
        };
    }

    /// A request cut short by the deadline or an interrupt. It is a failed
    /// request, counted separately from server-side errors.
    pub fn record_cancelled() {
        REQUESTS_FAILED.increment();
        REQUESTS_CANCELLED.increment();
    }

    pub fn run_totals() -> RunTotals {
        let (latency_p50, latency_p99) = p50_p99(&REQUEST_LATENCY);
        let (ttft_p50, ttft_p99) = p50_p99(&TTFT);

        RunTotals {
            requests_sent: REQUESTS_SENT.value(),
            requests_success: REQUESTS_SUCCESS.value(),
            requests_failed: REQUESTS_FAILED.value(),
            requests_cancelled: REQUESTS_CANCELLED.value(),
            tokens_input: TOKENS_INPUT.value(),
            tokens_output: TOKENS_OUTPUT.value(),
            latency_p50,
            latency_p99,
            ttft_p50,
            ttft_p99,
        }
    }
}
