//! Domain types for tunevault.
//!
//! This module contains the core data structures:
//! - CatalogRecord: The persisted result of an ingestion
//! - IngestionJob: A transient unit of work and its requester

pub mod job;
pub mod record;

// Re-export commonly used types
pub use job::{ChannelRequester, IngestionJob, JobReport, JobResult, Requester};
pub use record::{CatalogRecord, RecordStatus};
