use thiserror::Error;

/// Failures of the hierarchy and timetable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// Underlying I/O failure or lock timeout. Safe for the client to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
