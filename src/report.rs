use anyhow::Result;
use crossterm::style::{Stylize, style};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;

use crate::metrics::RunTotals;
use crate::stats::{LatencySummary, StatsSnapshot};

/// Final result of benchmarking one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub model: String,
    pub concurrency: usize,
    pub duration_ms: f64,

    // Request counts
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,

    // Throughput
    pub requests_per_second: f64,
    pub tokens_per_second: f64,
    pub input_tokens_per_second: f64,
    pub output_tokens_per_second: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,

    pub latency: LatencyReport,
    pub ttft: LatencyReport,

    /// Sorted by count descending, then message ascending
    pub errors: Vec<ErrorCount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl From<&LatencySummary> for LatencyReport {
    fn from(summary: &LatencySummary) -> Self {
        Self {
            avg_ms: millis(summary.avg),
            min_ms: millis(summary.min),
            max_ms: millis(summary.max),
            p95_ms: millis(summary.p95),
            p99_ms: millis(summary.p99),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub message: String,
    pub count: u64,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl BenchmarkResult {
    pub fn from_stats(model: &str, concurrency: usize, stats: &StatsSnapshot) -> Self {
        let mut errors: Vec<ErrorCount> = stats
            .errors
            .iter()
            .map(|(message, count)| ErrorCount {
                message: message.clone(),
                count: *count,
            })
            .collect();
        errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));

        Self {
            model: model.to_string(),
            concurrency,
            duration_ms: millis(stats.elapsed),
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            error_rate: stats.error_rate,
            requests_per_second: stats.requests_per_second,
            tokens_per_second: stats.tokens_per_second,
            input_tokens_per_second: stats.input_tokens_per_second,
            output_tokens_per_second: stats.output_tokens_per_second,
            total_input_tokens: stats.total_input_tokens,
            total_output_tokens: stats.total_output_tokens,
            latency: LatencyReport::from(&stats.latency),
            ttft: LatencyReport::from(&stats.ttft),
            errors,
        }
    }

    pub fn success_rate(&self) -> f64 {
        100.0 - self.error_rate
    }
}

/// Cross-model totals shown after the per-model details.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub models_tested: usize,
    pub total_requests_per_second: f64,
    pub total_tokens_per_second: f64,
    /// Highest requests/s, first one wins on ties
    pub best: Option<(String, f64)>,
}

impl Summary {
    pub fn from_results(results: &[BenchmarkResult]) -> Self {
        let mut best: Option<(String, f64)> = None;
        for result in results {
            let better = match &best {
                Some((_, rps)) => result.requests_per_second > *rps,
                None => result.requests_per_second > 0.0,
            };
            if better {
                best = Some((result.model.clone(), result.requests_per_second));
            }
        }

        Self {
            models_tested: results.len(),
            total_requests_per_second: results.iter().map(|r| r.requests_per_second).sum(),
            total_tokens_per_second: results.iter().map(|r| r.tokens_per_second).sum(),
            best,
        }
    }
}

/// Human scale for rates: one decimal, `k` suffix from 1000 on.
pub fn format_number(value: f64) -> String {
    if value >= 1000.0 {
        format!("{:.1}k", value / 1000.0)
    } else {
        format!("{:.1}", value)
    }
}

pub fn format_count(value: u64) -> String {
    if value >= 1000 {
        format!("{:.1}k", value as f64 / 1000.0)
    } else {
        value.to_string()
    }
}

/// Formats a millisecond value as `1.2s`, `340ms` or `850μs`.
pub fn format_duration_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{:.0}ms", ms)
    } else {
        format!("{:.0}μs", ms * 1000.0)
    }
}

pub fn format_percentage(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Terminal styling for rendered output. The plain palette emits no escape
/// codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Palette {
    color: bool,
}

impl Palette {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn heading(&self, text: &str) -> String {
        if self.color {
            style(text).bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn success(&self, text: &str) -> String {
        if self.color {
            style(text).green().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn failure(&self, text: &str) -> String {
        if self.color {
            style(text).red().to_string()
        } else {
            text.to_string()
        }
    }
}

/// Renders the results table, per-model details and the cross-model summary.
pub fn render_table(results: &[BenchmarkResult], palette: Palette) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", palette.heading("Benchmark Results"));
    let _ = writeln!(out, "{}", "=".repeat(60));

    if results.is_empty() {
        let _ = writeln!(out, "No benchmark results to display.");
        return out;
    }

    let headers = [
        "Model",
        "Tokens/sec",
        "Reqs/sec",
        "Success Rate",
        "Avg Latency",
        "P95 Latency",
    ];
    let rows: Vec<[String; 6]> = results
        .iter()
        .map(|r| {
            [
                r.model.clone(),
                format!("{:.2}", r.tokens_per_second),
                format!("{:.2}", r.requests_per_second),
                format_percentage(r.success_rate()),
                format_duration_ms(r.latency.avg_ms),
                format_duration_ms(r.latency.p95_ms),
            ]
        })
        .collect();

    let mut widths = headers.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render_row = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let _ = writeln!(out, "{}", render_row(&headers));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", separator.join("-+-"));
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{}", render_row(&cells));
    }

    for result in results {
        let _ = writeln!(out);
        render_model(&mut out, result, palette);
    }

    let _ = writeln!(out);
    render_summary(&mut out, &Summary::from_results(results), palette);

    out
}

fn render_model(out: &mut String, result: &BenchmarkResult, palette: Palette) {
    let _ = writeln!(out, "{}", palette.heading(&format!("Model: {}", result.model)));
    let _ = writeln!(out, "{}", "-".repeat(50));

    let _ = writeln!(out, "{:<20} {}", "Concurrency:", result.concurrency);
    let _ = writeln!(out, "{:<20} {}", "Duration:", format_duration_ms(result.duration_ms));
    let _ = writeln!(out, "{:<20} {}", "Total Requests:", format_count(result.total_requests));
    let _ = writeln!(
        out,
        "{:<20} {} ({} success rate)",
        "Successful:",
        palette.success(&format_count(result.successful_requests)),
        format_percentage(result.success_rate())
    );
    if result.failed_requests > 0 {
        let _ = writeln!(
            out,
            "{:<20} {} ({})",
            "Failed:",
            palette.failure(&format_count(result.failed_requests)),
            format_percentage(result.error_rate)
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{:<20} {}", "Requests/sec:", format_number(result.requests_per_second));
    let _ = writeln!(out, "{:<20} {}", "Tokens/sec:", format_number(result.tokens_per_second));
    let _ = writeln!(
        out,
        "{:<20} {}",
        "Input Tokens/sec:",
        format_number(result.input_tokens_per_second)
    );
    let _ = writeln!(
        out,
        "{:<20} {}",
        "Output Tokens/sec:",
        format_number(result.output_tokens_per_second)
    );

    let _ = writeln!(out);
    let latency = &result.latency;
    let _ = writeln!(out, "{:<20} {}", "Avg Latency:", format_duration_ms(latency.avg_ms));
    let _ = writeln!(out, "{:<20} {}", "Min Latency:", format_duration_ms(latency.min_ms));
    let _ = writeln!(out, "{:<20} {}", "Max Latency:", format_duration_ms(latency.max_ms));
    let _ = writeln!(out, "{:<20} {}", "P95 Latency:", format_duration_ms(latency.p95_ms));
    let _ = writeln!(out, "{:<20} {}", "P99 Latency:", format_duration_ms(latency.p99_ms));

    if result.ttft.avg_ms > 0.0 {
        let ttft = &result.ttft;
        let _ = writeln!(out, "{:<20} {}", "Avg TTFT:", format_duration_ms(ttft.avg_ms));
        let _ = writeln!(out, "{:<20} {}", "P95 TTFT:", format_duration_ms(ttft.p95_ms));
        let _ = writeln!(out, "{:<20} {}", "P99 TTFT:", format_duration_ms(ttft.p99_ms));
    }

    if !result.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", palette.failure("Errors:"));
        for error in &result.errors {
            let _ = writeln!(
                out,
                "  • {}",
                palette.failure(&format!("{}: {}", error.message, error.count))
            );
        }
    }
}

fn render_summary(out: &mut String, summary: &Summary, palette: Palette) {
    let _ = writeln!(out, "{}", palette.heading("Summary"));
    let _ = writeln!(out, "{}", "-".repeat(50));
    let _ = writeln!(out, "Models tested: {}", summary.models_tested);
    let _ = writeln!(out, "Total RPS: {}", format_number(summary.total_requests_per_second));
    let _ = writeln!(out, "Total TPS: {}", format_number(summary.total_tokens_per_second));
    if let Some((model, rps)) = &summary.best {
        let best = format!("{} ({} RPS)", model, format_number(*rps));
        let _ = writeln!(out, "Best performing: {}", palette.success(&best));
    }
}

/// One line with the run-wide counters kept in the metrics registry.
pub fn render_totals(totals: &RunTotals) -> String {
    let mut line = format!(
        "Run totals: Requests: {} Ok: {} Err: {}",
        totals.requests_sent, totals.requests_success, totals.requests_failed
    );
    if totals.requests_cancelled > 0 {
        let _ = write!(line, " (cancelled: {})", totals.requests_cancelled);
    }
    let _ = write!(
        line,
        " Tokens: Input: {} Output: {}",
        totals.tokens_input, totals.tokens_output
    );
    if let (Some(p50), Some(p99)) = (totals.latency_p50, totals.latency_p99) {
        let _ = write!(
            line,
            " Latency (ms): p50: {:.0} p99: {:.0}",
            millis(p50),
            millis(p99)
        );
    }
    if let (Some(p50), Some(p99)) = (totals.ttft_p50, totals.ttft_p99) {
        let _ = write!(
            line,
            " TTFT (ms): p50: {:.0} p99: {:.0}",
            millis(p50),
            millis(p99)
        );
    }
    line
}

pub fn render_json(results: &[BenchmarkResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}
