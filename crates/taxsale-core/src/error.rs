use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for taxsale.
#[derive(Error, Debug)]
pub enum AppError {
    /// The document host refused access (401/403, login wall, permission denied).
    #[error("Fetch denied: {0}")]
    FetchDenied(String),

    /// The document location no longer resolves (404/410, missing file).
    #[error("Document not found: {0}")]
    FetchNotFound(String),

    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The document was fetched but cannot be read as structured text
    /// (encrypted PDF, undecodable bytes).
    #[error("Unreadable document: {0}")]
    UnreadableDocument(String),

    /// No format profile matched and the document carries no sale-type hint.
    #[error("Format unrecognized: {0}")]
    FormatUnrecognized(String),

    /// The strategy could not find any text or rows to work with.
    #[error("No extractable content: {0}")]
    NoExtractableContent(String),

    /// A strategy collaborator is not wired up in this process.
    #[error("Strategy '{0}' is not configured")]
    NotConfigured(String),

    /// LLM API call failed (assisted extraction).
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request or attempt timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A format profile definition is invalid.
    #[error("Profile error: {0}")]
    ProfileError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Maps this error onto the error classification recorded by the job tracker.
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::FetchDenied(_) => ErrorClass::FetchDenied,
            AppError::FetchNotFound(_) => ErrorClass::FetchNotFound,
            AppError::FormatUnrecognized(_) => ErrorClass::FormatUnrecognized,
            AppError::NoExtractableContent(_) | AppError::UnreadableDocument(_) => {
                ErrorClass::NoExtractableContent
            }
            AppError::Timeout(_) => ErrorClass::Timeout,
            AppError::HttpError(msg) if msg.contains("HTTP 401") || msg.contains("HTTP 403") => {
                ErrorClass::FetchDenied
            }
            AppError::HttpError(msg) if msg.contains("HTTP 404") || msg.contains("HTTP 410") => {
                ErrorClass::FetchNotFound
            }
            _ => ErrorClass::Internal,
        }
    }
}

/// Error classification stored on extraction jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    FetchDenied,
    FetchNotFound,
    FormatUnrecognized,
    NoExtractableContent,
    /// Content was read but every data row failed to parse.
    ParseRowFailure,
    /// The attempt hit its wall-clock ceiling.
    Timeout,
    /// Anything else: collaborator crash, store failure, missing configuration.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::FetchDenied => "FETCH_DENIED",
            ErrorClass::FetchNotFound => "FETCH_NOT_FOUND",
            ErrorClass::FormatUnrecognized => "FORMAT_UNRECOGNIZED",
            ErrorClass::NoExtractableContent => "NO_EXTRACTABLE_CONTENT",
            ErrorClass::ParseRowFailure => "PARSE_ROW_FAILURE",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FETCH_DENIED" => Ok(ErrorClass::FetchDenied),
            "FETCH_NOT_FOUND" => Ok(ErrorClass::FetchNotFound),
            "FORMAT_UNRECOGNIZED" => Ok(ErrorClass::FormatUnrecognized),
            "NO_EXTRACTABLE_CONTENT" => Ok(ErrorClass::NoExtractableContent),
            "PARSE_ROW_FAILURE" => Ok(ErrorClass::ParseRowFailure),
            "TIMEOUT" => Ok(ErrorClass::Timeout),
            "INTERNAL" => Ok(ErrorClass::Internal),
            _ => Err(format!("Unknown error class: {}", s)),
        }
    }
}
