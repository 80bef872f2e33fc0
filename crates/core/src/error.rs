use crate::models::status::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid text: {0}")]
    Text(#[from] clinic_types::TextError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    /// The row changed between read and write.
    #[error("{entity} {id} was modified concurrently")]
    StaleWrite { entity: &'static str, id: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("operation not permitted: {0}")]
    Forbidden(String),

    #[error("provider payload error: {0}")]
    Provider(#[from] providers::ProviderError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt stored value in {column}: {value}")]
    CorruptRow { column: &'static str, value: String },
}

impl ClinicError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same operation later could succeed without any data changing.
    ///
    /// Webhook ingestion uses this to decide between recording a failure and asking the
    /// provider to redeliver.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClinicError::Database(_) | ClinicError::StaleWrite { .. })
    }

    pub fn stale(entity: &'static str, id: impl ToString) -> Self {
        Self::StaleWrite {
            entity,
            id: id.to_string(),
        }
    }
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;
