use thiserror::Error;

/// The error taxonomy a scheduled run reasons about. Row-level conditions
/// (`InvalidMetric`, `OrphanTelemetry`) never escape the transform stage as
/// errors — they are counted and dropped — but are represented here so the
/// same enum can describe both "what happened to this row" and "what
/// happened to this task" to the scheduler.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    #[error("orphan telemetry: chip_id {0} has no active prosthesis")]
    OrphanTelemetry(String),

    #[error("target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("invalidation failed for user {user_id}: {reason}")]
    InvalidationFailed { user_id: String, reason: String },

    #[error("run exceeded its {0:?} ceiling")]
    RunTimeout(std::time::Duration),

    #[error("previous run still holds the single-instance lock")]
    LockContention,
}

impl PipelineError {
    /// Whether this condition should fail the whole run (vs. be logged and
    /// the run allowed to continue/retry). Matches the handling column of
    /// spec §7's error taxonomy table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::SchemaMismatch(_) | PipelineError::RunTimeout(_)
        )
    }

    /// Whether the owning task should be retried by the scheduler before
    /// the run is marked Failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable(_) | PipelineError::TargetUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } => {
                PipelineError::SchemaMismatch(e.to_string())
            }
            _ => PipelineError::SourceUnavailable(e.to_string()),
        }
    }
}

/// ClickHouse errors are ambiguous without call-site context (the same
/// client error can come from reading telemetry or writing the mart), so
/// there is no blanket `From` impl — callers pick `source`/`target`.
pub fn ch_source_error(e: clickhouse::error::Error) -> PipelineError {
    PipelineError::SourceUnavailable(e.to_string())
}

pub fn ch_target_error(e: clickhouse::error::Error) -> PipelineError {
    PipelineError::TargetUnavailable(e.to_string())
}
