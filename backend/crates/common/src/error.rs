use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeSyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("destination error: {0}")]
    Destination(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A job failed; carries the job identity so the run log names it.
    #[error("error executing integration {name}: {source}")]
    Job {
        name: String,
        #[source]
        source: Box<TradeSyncError>,
    },
}

impl TradeSyncError {
    pub fn job(name: &str, source: TradeSyncError) -> Self {
        Self::Job {
            name: name.to_owned(),
            source: Box::new(source),
        }
    }

    /// Name of the failed job, if this error was raised by the job runner.
    pub fn job_name(&self) -> Option<&str> {
        match self {
            Self::Job { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub type TradeSyncResult<T> = Result<T, TradeSyncError>;
