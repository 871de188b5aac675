use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::OutputFormat;
use crate::prompts::PromptSize;

/// Parses `30s`, `1m30s`, `500ms`; a bare `0` means disabled.
pub fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    if value.trim() == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value.trim())
}

#[derive(Parser, Debug)]
#[command(name = "aibench")]
#[command(author, version, about = "Benchmark OpenAI-compatible chat completion servers", long_about = None)]
pub struct Cli {
    /// Server to benchmark, e.g. localhost:8000 or https://api.openai.com/v1
    pub server_url: Option<String>,

    /// Measurement duration per model
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Concurrent workers (0 = auto, negative = force 1)
    #[arg(short, long, allow_negative_numbers = true)]
    pub concurrency: Option<i64>,

    /// Comma-separated models to benchmark (default: discover from the server)
    #[arg(short, long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Per-request timeout
    #[arg(short, long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Warmup duration per model (0 disables warmup)
    #[arg(short, long, value_parser = parse_duration)]
    pub warmup: Option<Duration>,

    /// Use streaming responses and measure time to first token
    #[arg(long)]
    pub streaming: bool,

    /// Built-in prompt set to rotate through
    #[arg(long, value_enum)]
    pub prompt_size: Option<PromptSize>,

    /// Output format for the results
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// API key for bearer authentication
    #[arg(short = 'k', long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Do not query the server for models; requires --models
    #[arg(long)]
    pub skip_discovery: bool,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// max_tokens sent with every request
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Also write the results as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Runtime worker threads (default: number of CPUs)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
