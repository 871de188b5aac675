use aibench::{BenchmarkRunner, Cli, ClientConfig, Config, ConsoleReporter, OpenAIClient, shutdown};
use anyhow::Result;
use log::{debug, info};
use ringlog::{File, LogBuilder, MultiLogBuilder, Output, Stderr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum log file size before rotation (10MB)
const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024 * 10;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Resolve configuration first so the log level is known
    let config = Config::from_cli(&cli)?;

    let output: Box<dyn Output> = if let Some(ref log_file) = config.log.file {
        // Log to file with rotation
        let backup_file = log_file.with_extension("old");
        Box::new(File::new(log_file.clone(), backup_file, LOG_FILE_MAX_SIZE)?)
    } else {
        Box::new(Stderr::new())
    };

    let base_log = LogBuilder::new()
        .output(output)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to initialize logger: {:?}", e))?;

    let mut drain = MultiLogBuilder::new()
        .level_filter(config.log.level.to_level_filter())
        .default(base_log)
        .build()
        .start();

    std::thread::spawn(move || {
        loop {
            let _ = drain.flush();
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    // Build custom tokio runtime with specified worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;

    let outcome = runtime.block_on(run_benchmark(config));

    // give the drain a chance to write the last records
    std::thread::sleep(Duration::from_millis(200));
    outcome
}

async fn run_benchmark(config: Config) -> Result<()> {
    let client = OpenAIClient::new(ClientConfig {
        base_url: config.endpoint.server_url.clone(),
        api_key: config.endpoint.api_key.clone(),
        timeout: config.endpoint.timeout,
        max_tokens: config.endpoint.max_tokens,
        temperature: config.endpoint.temperature,
        pool_size: config.endpoint.pool_size,
    })?;
    debug!("Target base URL: {}", client.base_url());

    let reporter = ConsoleReporter::new(
        config.output.format,
        config.output.file.clone(),
        config.output.color,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_shutdown(cancel.clone()));

    let runner = BenchmarkRunner::new(config, Arc::new(client), Arc::new(reporter));
    info!("Starting benchmark run");
    let results = runner.run(&cancel).await?;
    info!("Benchmark completed: {} models", results.len());
    Ok(())
}
