use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker {id} failed: {reason}")]
    Worker { id: usize, reason: String },

    #[error("One or more workers had unrecoverable errors, result is probably incomplete")]
    Incomplete,

    #[error("One or more exec commands had errors")]
    Subprocess,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl From<postcard::Error> for SearchError {
    fn from(error: postcard::Error) -> Self {
        SearchError::Serialization(error.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(error: serde_json::Error) -> Self {
        SearchError::Serialization(error.to_string())
    }
}
