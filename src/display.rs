//! Console output: header, status lines, live progress and final results.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::OutputFormat;
use crate::metrics::Metrics;
use crate::report::{BenchmarkResult, Palette, render_json, render_table, render_totals};
use crate::snapshot::LiveStats;

const COLOR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s {msg}";
const PLAIN_TEMPLATE: &str = "[{elapsed_precise}] [{bar:40}] {pos}/{len}s {msg}";

/// Everything the benchmark engine tells the user.
pub trait Reporter: Send + Sync {
    fn run_started(&self, target: &str, models: &[String]);
    fn model_started(&self, model: &str);
    fn status(&self, message: &str);
    fn error(&self, message: &str);
    fn progress_started(&self, duration: Duration);
    fn progress(&self, stats: &LiveStats);
    fn progress_finished(&self);
    fn results(&self, results: &[BenchmarkResult]) -> Result<()>;
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}

pub struct ConsoleReporter {
    format: OutputFormat,
    output: Option<PathBuf>,
    color: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new(format: OutputFormat, output: Option<PathBuf>, color: bool) -> Self {
        Self {
            format,
            output,
            color,
            bar: Mutex::new(None),
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn palette(&self) -> Palette {
        Palette::new(self.color)
    }

    /// JSON on stdout must stay machine readable.
    fn chatter_to_stderr(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn emit(&self, line: &str) {
        let to_stderr = self.chatter_to_stderr();
        let print = || {
            if to_stderr {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        };

        match self.bar().as_ref() {
            Some(bar) => bar.suspend(print),
            None => print(),
        }
    }

    fn emit_timestamped(&self, message: &str) {
        self.emit(&format!("{} {}", timestamp(), message));
    }

    fn style(&self) -> ProgressStyle {
        let template = if self.color {
            COLOR_TEMPLATE
        } else {
            PLAIN_TEMPLATE
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }

    fn print_table(&self, results: &[BenchmarkResult]) {
        println!();
        print!("{}", render_table(results, self.palette()));

        let totals = Metrics::run_totals();
        if totals.requests_sent > 0 {
            println!();
            println!("{} {}", timestamp(), render_totals(&totals));
        }
    }
}

impl Reporter for ConsoleReporter {
    fn run_started(&self, target: &str, models: &[String]) {
        self.emit("");
        self.emit(&self.palette().heading("aibench - OpenAI API benchmarking tool"));
        self.emit(&format!("Server: {}", target));
        self.emit(&format!("Models: {}", models.join(", ")));
        self.emit(&"─".repeat(60));
    }

    fn model_started(&self, model: &str) {
        self.emit("");
        let line = format!("Benchmarking model: {}", model);
        self.emit_timestamped(&self.palette().heading(&line));
    }

    fn status(&self, message: &str) {
        self.emit_timestamped(message);
    }

    fn error(&self, message: &str) {
        self.emit_timestamped(&self.palette().failure(&format!("ERROR {}", message)));
    }

    fn progress_started(&self, duration: Duration) {
        let bar = ProgressBar::new(duration.as_secs().max(1));
        bar.set_style(self.style());
        bar.set_message("Running benchmark...");
        if let Some(previous) = self.bar().replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn progress(&self, stats: &LiveStats) {
        let guard = self.bar();
        let Some(bar) = guard.as_ref() else {
            return;
        };

        let message = if stats.successful > 0 && stats.tokens_per_second > 0.0 {
            format!(
                "Running benchmark... (Reqs: {} | {:.2} Tokens/sec)",
                stats.total, stats.tokens_per_second
            )
        } else {
            format!("Running benchmark... (Reqs: {})", stats.total)
        };
        bar.set_message(message);

        let position = stats.elapsed.as_secs();
        let length = bar.length().unwrap_or(position);
        bar.set_position(position.min(length));
    }

    fn progress_finished(&self) {
        if let Some(bar) = self.bar().take() {
            if let Some(length) = bar.length() {
                bar.set_position(length);
            }
            bar.finish();
        }
    }

    fn results(&self, results: &[BenchmarkResult]) -> Result<()> {
        if let Some(path) = &self.output {
            let json = render_json(results)?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            let line = format!("Results written to {}", path.display());
            self.emit_timestamped(&self.palette().success(&line));
        }

        match self.format {
            OutputFormat::Json => println!("{}", render_json(results)?),
            OutputFormat::Table => self.print_table(results),
        }
        Ok(())
    }
}
