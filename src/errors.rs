//! # Error Types Module
//!
//! Error types for the persistence, transport and publishing boundaries, and
//! the union the dialogue router catches at its dispatch boundary.
//!
//! Input validation, authorization denials and chat claim conflicts are not
//! errors here: they are ordinary dialogue outcomes with their own replies.

/// Persistence boundary failures
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

/// Chat transport failures
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Telegram request failed: {0}")]
    Request(String),

    #[error("Invalid media url: {0}")]
    MediaUrl(String),
}

/// Publishing boundary failures
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("Publishing is not configured")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Publishing gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Timeout error: no answer within {0} seconds")]
    Timeout(u64),

    #[error("Circuit breaker is open, publishing is paused")]
    CircuitOpen,
}

/// Malformed button payloads
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Empty payload")]
    Empty,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument for {action}: {value}")]
    InvalidArgument { action: &'static str, value: String },
}

/// Failures that abort a dispatch and surface as the generic failure reply
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
