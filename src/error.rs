use thiserror::Error;

/// Failures raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The record changed between load and save.
    #[error("student {id} was modified concurrently")]
    Stale { id: String },

    /// The UNIQUE index on `students.name` rejected the write.
    #[error("student name already taken: {0}")]
    DuplicateName(String),

    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

/// Error kinds returned by every score operation.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),

    /// Referenced student or exam detail does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Student name already in use.
    #[error("{0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ScoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        ScoreError::Validation(message.into())
    }

    pub fn student_not_found() -> Self {
        ScoreError::NotFound("student not found".to_string())
    }

    pub fn detail_not_found() -> Self {
        ScoreError::NotFound("exam detail not found".to_string())
    }

    pub fn student_exists() -> Self {
        ScoreError::Conflict("student already exists".to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScoreError>;
