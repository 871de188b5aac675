use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::concurrency::ConcurrencySetting;
use crate::error::BenchError;
use crate::prompts::PromptSize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout", with = "humantime_duration")]
    pub timeout: Duration,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize, // Idle connections kept per host
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_duration", with = "humantime_duration")]
    pub duration: Duration,
    #[serde(default = "default_warmup", with = "humantime_duration")]
    pub warmup: Duration, // "0s" disables warmup
    #[serde(default)]
    pub concurrency: i64, // 0 = auto, negative = force 1
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub prompt_size: PromptSize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Models to benchmark; discovered from the server when empty
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub skip_discovery: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default = "default_color")]
    pub color: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: None,
            timeout: default_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            warmup: default_warmup(),
            concurrency: 0,
            streaming: false,
            prompt_size: PromptSize::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            file: None,
            color: default_color(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.7
}

fn default_pool_size() -> usize {
    10
}

fn default_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_warmup() -> Duration {
    Duration::from_secs(5)
}

fn default_color() -> bool {
    true
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

/// Durations written as humantime strings such as `"30s"` or `"1m30s"`.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        crate::cli::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Starts from the config file (or defaults) and applies command-line
    /// overrides. The result is validated.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(server_url) = &cli.server_url {
            config.endpoint.server_url = server_url.clone();
        }
        if let Some(api_key) = &cli.api_key {
            config.endpoint.api_key = Some(api_key.clone());
        }
        if let Some(timeout) = cli.timeout {
            config.endpoint.timeout = timeout;
        }
        if let Some(max_tokens) = cli.max_tokens {
            config.endpoint.max_tokens = max_tokens;
        }

        if let Some(duration) = cli.duration {
            config.load.duration = duration;
        }
        if let Some(warmup) = cli.warmup {
            config.load.warmup = warmup;
        }
        if let Some(concurrency) = cli.concurrency {
            config.load.concurrency = concurrency;
        }
        if cli.streaming {
            config.load.streaming = true;
        }
        if let Some(prompt_size) = cli.prompt_size {
            config.load.prompt_size = prompt_size;
        }

        let models: Vec<String> = cli
            .models
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        if !models.is_empty() {
            config.models.names = models;
        }
        if cli.skip_discovery {
            config.models.skip_discovery = true;
        }

        if let Some(format) = cli.format {
            config.output.format = format;
        }
        if let Some(file) = &cli.output {
            config.output.file = Some(file.clone());
        }
        if cli.no_color {
            config.output.color = false;
        }

        if let Some(threads) = cli.threads {
            config.runtime.worker_threads = threads;
        }
        if cli.verbose {
            config.log.level = LogLevel::Debug;
        }
        if let Some(file) = &cli.log_file {
            config.log.file = Some(file.clone());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn concurrency(&self) -> ConcurrencySetting {
        ConcurrencySetting::from(self.load.concurrency)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.endpoint.server_url.trim().is_empty() {
            return Err(BenchError::Configuration(
                "a server URL is required".to_string(),
            ));
        }

        if self.load.duration.is_zero() {
            return Err(BenchError::Configuration(
                "duration must be greater than 0".to_string(),
            ));
        }

        if self.endpoint.timeout.is_zero() {
            return Err(BenchError::Configuration(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if self.endpoint.max_tokens == 0 {
            return Err(BenchError::Configuration(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.endpoint.pool_size == 0 {
            return Err(BenchError::Configuration(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        if self.runtime.worker_threads == 0 {
            return Err(BenchError::Configuration(
                "worker_threads must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
