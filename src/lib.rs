pub mod benchmark;
pub mod cli;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod display;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod shutdown;
pub mod snapshot;
pub mod stats;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use benchmark::BenchmarkRunner;
pub use cli::Cli;
pub use client::{ClientConfig, ClientError, Completion, CompletionClient, OpenAIClient};
pub use concurrency::{ConcurrencySetting, ConcurrencyStrategy, SingleConcurrency};
pub use config::{Config, OutputFormat};
pub use display::{ConsoleReporter, Reporter};
pub use error::BenchError;
pub use metrics::Metrics;
pub use report::BenchmarkResult;
pub use stats::{RequestOutcome, StatsAggregator, StatsSnapshot};
