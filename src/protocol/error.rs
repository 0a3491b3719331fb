//! Protocol errors
//!
//! Handlers and the transfer engine raise these; only the dispatcher turns them
//! into HTTP status codes.

use crate::storage::StorageError;
use crate::store::StoreError;
use hyper::StatusCode;
use thiserror::Error;

/// Errors raised while serving a tus request
#[derive(Error, Debug)]
pub enum TusError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bad header: {0}")]
    HeaderValidation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    StorageIo(String),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("Overflow: {0}")]
    Overflow(String),

    #[error("Server misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
}

impl TusError {
    /// HTTP status the dispatcher answers with for this error
    pub fn status(&self) -> StatusCode {
        match self {
            TusError::HeaderValidation(_) | TusError::Overflow(_) => StatusCode::BAD_REQUEST,
            TusError::NotFound(_) => StatusCode::NOT_FOUND,
            TusError::Conflict(_) => StatusCode::CONFLICT,
            TusError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            TusError::InvalidArgument(_)
            | TusError::StorageIo(_)
            | TusError::Store(_)
            | TusError::Misconfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            TusError::InvalidArgument(_) => "invalid_argument",
            TusError::HeaderValidation(_) => "header_validation",
            TusError::NotFound(_) => "not_found",
            TusError::Conflict(_) => "conflict",
            TusError::StorageIo(_) => "storage_io",
            TusError::Store(_) => "metadata_store",
            TusError::Overflow(_) => "overflow",
            TusError::Misconfiguration(_) => "misconfiguration",
            TusError::MethodNotAllowed(_) => "method_not_allowed",
        }
    }
}

impl From<StorageError> for TusError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => TusError::NotFound(format!("no stored content for {}", id)),
            StorageError::AlreadyExists(id) => {
                TusError::Conflict(format!("stored content already exists for {}", id))
            }
            other => TusError::StorageIo(other.to_string()),
        }
    }
}
