//! tunevault - deduplicating audio ingestion pipeline
//!
//! Turns a media URL into exactly one catalog record pointing at an audio
//! blob stored on Telegram, downloading and uploading at most once per
//! distinct source.
//!
//! # Architecture
//!
//! The system is built around a content-addressed catalog:
//! - Every URL normalizes to an identity key (SHA256 prefix)
//! - The catalog's unique key on that identity is the only synchronization
//!   point between concurrent jobs
//! - A bounded worker pool caps how many extractions run at once
//!
//! # Modules
//!
//! - `adapters`: External tool integrations (yt-dlp, ffprobe, Telegram)
//! - `core`: Ingestion pipeline, worker pool, error taxonomy
//! - `domain`: Data structures (CatalogRecord, IngestionJob)
//! - `library`: Catalog storage, identity hashing, title parsing
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ingest one URL
//! tunevault ingest "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
//!
//! # Ingest a list through the worker pool
//! tunevault batch urls.txt --workers 3
//!
//! # Force re-ingestion after the stored blob went stale
//! tunevault mark-missing "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod library;

// Re-export main types at crate root for convenience
pub use crate::core::{
    CatalogError, Disposition, IngestError, IngestLimits, IngestOutcome, IngestStage,
    IngestionPipeline, PoolError, PoolSettings, WorkerPool,
};
pub use domain::{CatalogRecord, IngestionJob, RecordStatus, Requester};
pub use library::{identity, Catalog, IdentityKey, SqliteCatalog};

// Telegram integration
pub use adapters::{TelegramClient, TelegramConfig};
