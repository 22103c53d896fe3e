use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Parameter '{name}' has a disallowed value: {value:?}")]
    InvalidParameter { name: String, value: String },

    #[error("SQL Validation Error: {0}")]
    ValidationFailed(String),

    #[error("Unsafe SQL detected ({0}) - only SELECT queries are allowed")]
    UnsafeSql(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Query failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u8, last_error: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for QueryError {
    fn from(e: polars::error::PolarsError) -> Self {
        QueryError::Polars(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
