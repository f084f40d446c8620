//! Error types for scheduling, budgeting and checkpointing

use thiserror::Error;

/// Errors raised while running chunks
#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),

    #[error(
        "a single request of {requested} bytes exceeds the memory ceiling of {limit} bytes; \
         lower the chunk size or raise the memory ceiling"
    )]
    ResourceExhausted { requested: usize, limit: usize },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

pub type Result<T> = std::result::Result<T, ParallelError>;
