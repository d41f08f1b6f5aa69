/// Errors raised by the reporting core and its store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced teacher, subject or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The record exists but fails a precondition (e.g. the user is not a teacher).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Caller supplied an out-of-range month, year or field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored value could not be mapped onto the domain types.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a client caused the failure (as opposed to the store or the host).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidState(_) | Error::InvalidInput(_)
        )
    }
}
