use crate::email::EmailError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The caller broke a precondition. Never swallowed.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Email error: {0}")]
    Email(#[from] EmailError),
}

impl AppError {
    /// Whether the error points at a bug in the calling code rather than at
    /// the environment.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::Persistence(StoreError::Database(e))
    }
}
