//! Catalog records produced by successful ingestion.
//!
//! A record is the persisted result of turning one source URL into a stored
//! audio blob. Exactly one record exists per identity key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Deduplication key derived from the normalized source URL
    pub identity_key: String,

    /// Opaque reference returned by the blob host
    pub blob_ref: String,

    /// Original URL, retained for re-ingestion
    pub source_url: String,

    /// Best-effort track title
    pub title: String,

    /// Best-effort performer
    pub artist: String,

    /// Album name (empty when unknown)
    #[serde(default)]
    pub album: String,

    /// Duration in seconds, 0 means unknown
    pub duration_seconds: u32,

    /// Size of the uploaded artifact as reported by the blob host
    pub size_bytes: u64,

    /// Current lifecycle status
    pub status: RecordStatus,

    /// When the record was first created
    pub created_at: DateTime<Utc>,

    /// When the record was last changed
    pub updated_at: DateTime<Utc>,
}

impl CatalogRecord {
    /// Create a fresh active record
    pub fn new(
        identity_key: impl Into<String>,
        source_url: impl Into<String>,
        blob_ref: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            identity_key: identity_key.into(),
            blob_ref: blob_ref.into(),
            source_url: source_url.into(),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            duration_seconds: 0,
            size_bytes,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set title and artist
    pub fn with_track(mut self, title: impl Into<String>, artist: impl Into<String>) -> Self {
        self.title = title.into();
        self.artist = artist.into();
        self
    }

    /// Set the duration in seconds
    pub fn with_duration(mut self, duration_seconds: u32) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    /// Whether the blob reference is known to be usable
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Blob reference is valid
    Active,

    /// Blob reference is stale; the record needs re-ingestion
    Missing,

    /// Ingestion in progress
    Processing,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Missing => "missing",
            RecordStatus::Processing => "processing",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "missing" => Ok(RecordStatus::Missing),
            "processing" => Ok(RecordStatus::Processing),
            _ => anyhow::bail!("Unknown record status: {}", s),
        }
    }
}
