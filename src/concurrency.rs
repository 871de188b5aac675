use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// The user's concurrency request, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencySetting {
    /// `0`: let the [`ConcurrencyStrategy`] decide
    Auto,
    /// Any negative value: exactly one worker
    ForceSingle,
    Fixed(usize),
}

impl From<i64> for ConcurrencySetting {
    fn from(value: i64) -> Self {
        match value {
            0 => ConcurrencySetting::Auto,
            v if v < 0 => ConcurrencySetting::ForceSingle,
            v => ConcurrencySetting::Fixed(usize::try_from(v).unwrap_or(usize::MAX)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyDecision {
    pub concurrency: usize,
    /// Shown to the user when present
    pub notice: Option<String>,
}

/// Picks the worker count for a model when the user asked for auto.
#[async_trait]
pub trait ConcurrencyStrategy: Send + Sync {
    async fn decide(&self, model: &str, cancel: &CancellationToken) -> Result<ConcurrencyDecision>;
}

/// Remote APIs are usually rate limited per key, so auto means one worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleConcurrency;

#[async_trait]
impl ConcurrencyStrategy for SingleConcurrency {
    async fn decide(&self, _model: &str, _cancel: &CancellationToken) -> Result<ConcurrencyDecision> {
        Ok(ConcurrencyDecision {
            concurrency: 1,
            notice: Some("Using concurrency: 1 (default for remote APIs)".to_string()),
        })
    }
}

pub async fn decide_concurrency(
    setting: ConcurrencySetting,
    strategy: &dyn ConcurrencyStrategy,
    model: &str,
    cancel: &CancellationToken,
) -> Result<ConcurrencyDecision> {
    match setting {
        ConcurrencySetting::Fixed(concurrency) => Ok(ConcurrencyDecision {
            concurrency,
            notice: None,
        }),
        ConcurrencySetting::ForceSingle => Ok(ConcurrencyDecision {
            concurrency: 1,
            notice: Some("Forced concurrency: 1".to_string()),
        }),
        ConcurrencySetting::Auto => {
            let decision = strategy.decide(model, cancel).await?;
            if decision.concurrency == 0 {
                bail!("concurrency strategy chose zero workers for {}", model);
            }
            Ok(decision)
        }
    }
}
