//! Failure taxonomy for ingestion jobs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stage of the ingestion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestStage {
    CheckingIdentity,
    Extracting,
    Uploading,
    Persisting,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::CheckingIdentity => "checking_identity",
            IngestStage::Extracting => "extracting",
            IngestStage::Uploading => "uploading",
            IngestStage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Errors that terminate an ingestion job
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Extraction failed: {message}")]
    ExtractionFailed {
        message: String,
        /// Raw extractor output, kept for diagnostics
        output: String,
    },

    #[error("Artifact too large: {size} bytes (limit {limit} bytes)")]
    ArtifactTooLarge { size: u64, limit: u64 },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Timed out during {stage} after {after:?}")]
    Timeout { stage: IngestStage, after: Duration },
}

impl IngestError {
    /// Build an extraction failure without tool output
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            message: message.into(),
            output: String::new(),
        }
    }

    /// Stage in which this error occurred
    pub fn stage(&self) -> IngestStage {
        match self {
            Self::InvalidUrl { .. } => IngestStage::CheckingIdentity,
            Self::ExtractionFailed { .. } | Self::ArtifactTooLarge { .. } => {
                IngestStage::Extracting
            }
            Self::UploadFailed(_) => IngestStage::Uploading,
            Self::PersistenceFailed(_) => IngestStage::Persisting,
            Self::Timeout { stage, .. } => *stage,
        }
    }

    /// Whether this is a deadline overrun
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors at the catalog boundary
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Record already exists for identity {0}")]
    DuplicateIdentity(String),

    #[error("No record for identity {0}")]
    NotFound(String),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for CatalogError {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(e)
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}

/// Errors returned by the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Worker pool is shut down; job rejected")]
    Rejected,
}
