use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by monitor and alert record storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("monitor {0} not found")]
    NotFound(Uuid),
    #[error("monitor {id} was modified concurrently (expected version {expected})")]
    Conflict { id: Uuid, expected: i64 },
    #[error("monitor {0} already exists")]
    AlreadyExists(Uuid),
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<deadpool::managed::PoolError<libsql::Error>> for StoreError {
    fn from(err: deadpool::managed::PoolError<libsql::Error>) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Errors surfaced by the liveness engine to its callers
#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("monitor {0} not found")]
    NotFound(Uuid),
    /// The ping was accepted for logging only; the monitor no longer alerts
    #[error("monitor {id} has expired")]
    AlreadyExpired { id: Uuid, recorded: bool },
    #[error("monitor {0} kept changing underneath the update, giving up")]
    Conflict(Uuid),
    #[error("monitor {id} is malformed: {reason}")]
    InvalidMonitor { id: Uuid, reason: String },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LivenessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => LivenessError::NotFound(id),
            StoreError::Conflict { id, .. } => LivenessError::Conflict(id),
            other => LivenessError::Store(other),
        }
    }
}
