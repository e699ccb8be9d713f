// Secure Vision Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecureVisionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Identity name must not be empty")]
    EmptyName,

    #[error("Identity name already registered: {0}")]
    DuplicateName(String),

    #[error("Invalid embedding: expected {expected} values, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },

    #[error("Invalid embedding: contains non-finite values")]
    NonFiniteEmbedding,

    #[error("Identity not found: {0}")]
    IdentityNotFound(i64),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Face subsystem unavailable: {0}")]
    FaceSubsystemUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for SecureVisionError {
    fn from(err: anyhow::Error) -> Self {
        SecureVisionError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SecureVisionError>;
