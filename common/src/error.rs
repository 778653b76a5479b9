use thiserror::Error;

/// Error taxonomy for the memory service (spec §7).
///
/// `Configuration` and `Validation` are surfaced synchronously to callers;
/// everything else only ever happens inside a handler or the write engine
/// and is observed later through pipeline/operation state.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transient I/O error: {0}")]
    TransientIo(String),
    #[error("permanent I/O error: {0}")]
    PermanentIo(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cancelled")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("internal error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a handler/write-engine step returning this error should be retried
    /// with back-off, or treated as permanent (spec §7).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Validation(_)
            | AppError::Configuration(_)
            | AppError::PermanentIo(_)
            | AppError::Cancelled
            | AppError::NotFound(_) => false,
            AppError::TransientIo(_) | AppError::Conflict(_) => true,
            AppError::Database(_)
            | AppError::OpenAi(_)
            | AppError::ObjectStore(_)
            | AppError::Reqwest(_)
            | AppError::Io(_)
            | AppError::Join(_)
            | AppError::Anyhow(_) => true,
        }
    }
}

/// The outcome of a single pipeline handler or write-engine step (spec §4.3, Design Note 3).
///
/// Handlers never throw for control flow; they return one of these, tagged,
/// and the orchestrator/write-engine decides what to do with it.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Transient(String),
    Permanent(String),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T, AppError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(AppError::Cancelled) => Outcome::Cancelled,
            Err(err) if err.is_retryable() => Outcome::Transient(err.to_string()),
            Err(err) => Outcome::Permanent(err.to_string()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_io_is_retryable() {
        assert!(AppError::TransientIo("throttled".into()).is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!AppError::Validation("bad tag".into()).is_retryable());
    }

    #[test]
    fn outcome_from_result_maps_cancelled() {
        let outcome: Outcome<()> = Outcome::from_result(Err(AppError::Cancelled));
        assert!(matches!(outcome, Outcome::Cancelled));
    }

    #[test]
    fn outcome_from_result_maps_permanent() {
        let outcome: Outcome<()> =
            Outcome::from_result(Err(AppError::PermanentIo("unsupported_mime".into())));
        assert!(matches!(outcome, Outcome::Permanent(reason) if reason.contains("unsupported_mime")));
    }
}
