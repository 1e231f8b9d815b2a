//! Core ingestion logic.
//!
//! This module contains:
//! - Error: failure taxonomy shared by pipeline, catalog and pool
//! - Pipeline: the per-URL ingestion state machine
//! - Pool: bounded worker pool that runs ingestion jobs

pub mod error;
pub mod pipeline;
pub mod pool;

// Re-export commonly used types
pub use error::{CatalogError, IngestError, IngestStage, PoolError};
pub use pipeline::{Disposition, IngestLimits, IngestOutcome, IngestionPipeline, DEFAULT_MAX_BYTES};
pub use pool::{Job, PoolSettings, WorkerPool};
