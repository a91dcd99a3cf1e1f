//! Engine error type.

use thiserror::Error;

/// Errors surfaced to the caller.
///
/// Only setup problems are reported this way. Inside a run, missing data is
/// non-triggering, per-scenario failures are logged and skipped, and a
/// mutation that cannot be applied simply reports `false`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("scenario set has no scenarios with positive weight")]
    EmptyScenarioSet,

    #[error("node structure has no time steps")]
    NoTimeSteps,

    #[error("unknown sensor type: {0}")]
    UnknownSensorType(String),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("scenario data provider failed: {0}")]
    Provider(String),

    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
