//! Error Classifier
//!
//! Classifies candidate failures into the classes the repair loop acts on.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL error classification taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    /// A value could not be converted by a strict cast
    TypeConversion,
    /// A textual column was used where a number was expected
    TypeMismatch,
    /// Rejected by structural validation before execution
    Validation(String),
    /// Rejected by the safety assertion before execution
    Unsafe(String),
    /// Anything else; never rewritten automatically
    Other(String),
}

impl SqlErrorClass {
    pub fn is_rewritable(&self) -> bool {
        matches!(self, SqlErrorClass::TypeConversion | SqlErrorClass::TypeMismatch)
    }
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::TypeConversion => write!(f, "type-conversion"),
            SqlErrorClass::TypeMismatch => write!(f, "type-mismatch"),
            SqlErrorClass::Validation(msg) => write!(f, "validation({})", msg),
            SqlErrorClass::Unsafe(msg) => write!(f, "unsafe({})", msg),
            SqlErrorClass::Other(msg) => write!(f, "other({})", msg),
        }
    }
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an error into the taxonomy
    pub fn classify(&self, error: &QueryError) -> SqlErrorClass {
        match error {
            QueryError::ValidationFailed(reason) => return SqlErrorClass::Validation(reason.clone()),
            QueryError::UnsafeSql(keyword) => return SqlErrorClass::Unsafe(keyword.clone()),
            _ => {}
        }

        let error_msg = error.to_string().to_lowercase();

        if error_msg.contains("conversion error") && error_msg.contains("could not convert") {
            return SqlErrorClass::TypeConversion;
        }

        if error_msg.contains("binder error") && error_msg.contains("varchar") {
            return SqlErrorClass::TypeMismatch;
        }

        SqlErrorClass::Other(error.to_string())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
