use kinvey_query::QueryError;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KinveyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("No response was produced for {0}")]
    NoResponse(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Entity with id '{0}' not found")]
    EntityNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Insufficient credentials: {0}")]
    InsufficientCredentials(String),

    #[error("There is no active user")]
    NoActiveUser,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error {status} ({name}): {message}")]
    Server {
        status: u16,
        name: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Custom request properties are {size} bytes, the maximum is {max} bytes")]
    CustomPropertiesTooLarge { size: usize, max: usize },

    #[error("{name} ({status}): {message}")]
    Kinvey {
        status: u16,
        name: String,
        message: String,
        debug: Option<String>,
    },
}

pub type KinveyResult<T> = Result<T, KinveyError>;

impl serde::Serialize for KinveyError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<rocksdb::Error> for KinveyError {
    fn from(err: rocksdb::Error) -> Self {
        KinveyError::Database(err.into_string())
    }
}

impl From<rusqlite::Error> for KinveyError {
    fn from(err: rusqlite::Error) -> Self {
        KinveyError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for KinveyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            KinveyError::Timeout(err.to_string())
        } else {
            KinveyError::Network(err.to_string())
        }
    }
}

impl KinveyError {
    /// Map a failed backend response onto the error taxonomy.
    ///
    /// The backend reports failures as `{"error": name, "description": ..., "debug": ...}`.
    pub fn from_status(status: u16, payload: &Value) -> Self {
        let name = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("KinveyError")
            .to_string();
        let message = payload
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {}", status));
        let debug = payload.get("debug").and_then(|d| match d {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

        match (status, name.as_str()) {
            (401, "InvalidCredentials") => KinveyError::InvalidCredentials(message),
            (401, _) | (403, _) => KinveyError::InsufficientCredentials(message),
            (404, "EntityNotFound") => KinveyError::EntityNotFound(message),
            (404, "CollectionNotFound") => KinveyError::CollectionNotFound(message),
            (404, _) => KinveyError::NotFound(message),
            (500..=599, _) => KinveyError::Server {
                status,
                name,
                message,
            },
            _ => KinveyError::Kinvey {
                status,
                name,
                message,
                debug,
            },
        }
    }

    /// HTTP status carried by the error, when it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            KinveyError::InvalidCredentials(_) => Some(401),
            KinveyError::NotFound(_) => Some(404),
            KinveyError::Server { status, .. } | KinveyError::Kinvey { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Collection absence looks like entity absence to a reader.
    pub fn into_read_error(self, id: &str) -> Self {
        match self {
            KinveyError::CollectionNotFound(_) => KinveyError::EntityNotFound(id.to_string()),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KinveyError::NotFound(_)
                | KinveyError::EntityNotFound(_)
                | KinveyError::CollectionNotFound(_)
        )
    }

    /// The backend could not be reached or failed on its side.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            KinveyError::Network(_) | KinveyError::Timeout(_) | KinveyError::Server { .. }
        )
    }
}
