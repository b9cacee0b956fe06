//! Error types for kinvey-query.
//!
//! Kept free of storage and transport concerns so the crate stays reusable.

use thiserror::Error;

/// Query error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    #[error("Query operator {0} is not supported offline")]
    UnsupportedOffline(String),

    #[error("Invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("Cannot be sent to the backend: {0}")]
    NotSerializable(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
