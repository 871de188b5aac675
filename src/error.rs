//! Error types for run-level and per-model failures.
//!
//! Request-level failures are [`ClientError`]s and never surface here: the
//! stats aggregator absorbs them. A [`BenchError`] either aborts the whole run
//! (configuration, discovery, reporting) or only the model being benchmarked.

use thiserror::Error;

use crate::client::ClientError;

#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid configuration, detected before any network activity
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model listing endpoint failed
    #[error("failed to discover models: {0}")]
    Discovery(#[from] ClientError),

    /// The model listing endpoint returned nothing to benchmark
    #[error("no models available for testing")]
    NoModels,

    /// The warmup phase failed; reported but never fatal
    #[error("warmup failed: {0}")]
    Warmup(String),

    /// The benchmark of a single model failed; the run moves on
    #[error("benchmark of model {model} failed: {reason}")]
    Benchmark { model: String, reason: String },

    /// Results could not be rendered or written
    #[error("failed to report results: {0}")]
    Report(String),
}

impl BenchError {
    /// Whether this error stops the whole run rather than a single model.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BenchError::Configuration(_)
                | BenchError::Discovery(_)
                | BenchError::NoModels
                | BenchError::Report(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(BenchError::Configuration("bad".into()).is_fatal());
        assert!(BenchError::NoModels.is_fatal());
        assert!(BenchError::Discovery(ClientError::Timeout(std::time::Duration::from_secs(1))).is_fatal());
        assert!(BenchError::Report("disk full".into()).is_fatal());
        assert!(!BenchError::Warmup("boom".into()).is_fatal());
        assert!(
            !BenchError::Benchmark {
                model: "m".into(),
                reason: "r".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_messages() {
        let err = BenchError::Benchmark {
            model: "llama".into(),
            reason: "worker panicked".into(),
        };
        assert_eq!(
            err.to_string(),
            "benchmark of model llama failed: worker panicked"
        );
        assert_eq!(
            BenchError::NoModels.to_string(),
            "no models available for testing"
        );
    }
}
