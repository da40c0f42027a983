use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Embedding error for item {index}: {reason}")]
    Embedding { index: usize, reason: String },
    #[error("Dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
    #[error("Model version mismatch: index was built with '{index_tag}', configured provider is '{provider_tag}'")]
    ModelVersionMismatch {
        index_tag: String,
        provider_tag: String,
    },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Completion error: {0}")]
    Completion(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
