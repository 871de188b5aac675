//! Live throughput for the progress display.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::stats::StatsAggregator;

/// Minimum spacing between recomputations of the recent rates.
const RECENT_WINDOW: Duration = Duration::from_secs(1);

/// Run time after which a positive recent rate replaces the cumulative one.
const RECENT_AFTER: Duration = Duration::from_secs(3);

/// One progress tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveStats {
    pub requests_per_second: f64,
    pub tokens_per_second: f64,
    pub successful: u64,
    pub total: u64,
    pub elapsed: Duration,
}

/// Rate tracker owned by the progress loop of a single model run.
///
/// Reads the aggregator only through [`StatsAggregator::counters`], so polling
/// never contends with workers beyond a shared lock.
#[derive(Debug)]
pub struct LiveSnapshot {
    stats: Arc<StatsAggregator>,
    last_update: Instant,
    last_successes: u64,
    last_tokens: u64,
    recent_rps: f64,
    recent_tps: f64,
}

impl LiveSnapshot {
    pub fn new(stats: Arc<StatsAggregator>) -> Self {
        let counters = stats.counters();
        Self {
            stats,
            last_update: counters.start_time,
            last_successes: counters.successes,
            last_tokens: counters.tokens,
            recent_rps: 0.0,
            recent_tps: 0.0,
        }
    }

    pub fn live_stats(&mut self) -> LiveStats {
        self.live_stats_at(Instant::now())
    }

    pub fn live_stats_at(&mut self, now: Instant) -> LiveStats {
        let counters = self.stats.counters();
        let elapsed = now.saturating_duration_since(counters.start_time);
        let secs = elapsed.as_secs_f64();

        let (cumulative_rps, cumulative_tps) = if secs > 0.0 {
            (
                counters.successes as f64 / secs,
                counters.tokens as f64 / secs,
            )
        } else {
            (0.0, 0.0)
        };

        let since_update = now.saturating_duration_since(self.last_update);
        if since_update >= RECENT_WINDOW {
            let window = since_update.as_secs_f64();
            self.recent_rps = counters.successes.saturating_sub(self.last_successes) as f64 / window;
            self.recent_tps = counters.tokens.saturating_sub(self.last_tokens) as f64 / window;
            self.last_update = now;
            self.last_successes = counters.successes;
            self.last_tokens = counters.tokens;
        }

        let settled = elapsed > RECENT_AFTER;
        let requests_per_second = if settled && self.recent_rps > 0.0 {
            self.recent_rps
        } else {
            cumulative_rps
        };
        let tokens_per_second = if settled && self.recent_tps > 0.0 {
            self.recent_tps
        } else {
            cumulative_tps
        };

        LiveStats {
            requests_per_second,
            tokens_per_second,
            successful: counters.successes,
            total: counters.total,
            elapsed,
        }
    }
}
