use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` for telemetry pipeline operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors raised by the telemetry pipeline itself.
///
/// These never propagate into business logic; they surface only from explicit
/// pipeline calls such as `force_flush` and `shutdown`, or as local log lines.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The pipeline component has already been shut down.
    #[error("telemetry component already shut down")]
    AlreadyShutdown,

    /// A flush or shutdown did not complete within its grace timeout.
    #[error("telemetry operation timed out after {0:?}")]
    Timeout(Duration),

    /// Exporter configuration was invalid at startup. Fatal: the pipeline
    /// refuses to initialize rather than silently degrade later.
    #[error("invalid telemetry configuration: {0}")]
    Config(String),

    /// A batch could not be delivered to the collector. The batch is dropped.
    #[error("export failed: {0}")]
    Export(String),

    /// Other internal failures (poisoned locks, closed channels).
    #[error("{0}")]
    Internal(String),
}

impl<T> From<PoisonError<T>> for TelemetryError {
    fn from(err: PoisonError<T>) -> Self {
        TelemetryError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Export(format!("serialization failed: {err}"))
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::Export(format!("compression failed: {err}"))
    }
}
