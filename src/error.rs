use thiserror::Error;

/// Errors that escape a pipeline operation to its caller.
///
/// Candidate-level and ad-level failures never show up here; they are folded
/// into the record's `retry_count` and `last_error` instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ad {0} not found")]
    RecordNotFound(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
