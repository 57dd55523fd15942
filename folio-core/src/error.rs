//! Error taxonomy for the ingestion pipeline.
//!
//! Fatal errors abort a run and become the `ErrorDetail` of a failed
//! document. Recoverable conditions never surface as `Err`; they are
//! recorded as `ProcessingWarning`s on the finished document instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ProcessingStatus;

/// Stable, serializable classification of a processing error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    ContainerReadError,
    HierarchyError,
    MissingAsset,
    MalformedContentUnit,
    Cancelled,
    InvariantViolation,
    StorageError,
}

/// Structured error attached to a failed document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("container read error: {0}")]
    ContainerRead(String),

    #[error("hierarchy error: {0}")]
    Hierarchy(String),

    #[error("missing asset: {0}")]
    MissingAsset(String),

    #[error("malformed content unit {unit}: {message}")]
    MalformedContentUnit { unit: String, message: String },

    #[error("processing cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            IngestError::ContainerRead(_) => ErrorKind::ContainerReadError,
            IngestError::Hierarchy(_) => ErrorKind::HierarchyError,
            IngestError::MissingAsset(_) => ErrorKind::MissingAsset,
            IngestError::MalformedContentUnit { .. } => ErrorKind::MalformedContentUnit,
            IngestError::Cancelled => ErrorKind::Cancelled,
            IngestError::InvariantViolation(_) | IngestError::InvalidTransition { .. } => {
                ErrorKind::InvariantViolation
            }
            IngestError::Storage(_) => ErrorKind::StorageError,
        }
    }

    /// Recoverable errors are absorbed as warnings and never fail a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IngestError::MissingAsset(_) | IngestError::MalformedContentUnit { .. }
        )
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(e: zip::result::ZipError) -> Self {
        IngestError::ContainerRead(e.to_string())
    }
}

impl From<lopdf::Error> for IngestError {
    fn from(e: lopdf::Error) -> Self {
        IngestError::ContainerRead(e.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::ContainerRead(e.to_string())
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
