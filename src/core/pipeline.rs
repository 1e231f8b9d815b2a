//! Ingestion pipeline.
//!
//! Turns a source URL into exactly one catalog record:
//!
//! ```text
//! CheckingIdentity ──hit──────────────────────────────────────▶ Done
//!        │ miss / stale
//!        ▼
//!   Extracting ──▶ Uploading ──▶ Persisting ──▶ Done
//!        │              │             │
//!        └──────────────┴─────────────┴──▶ Failed(kind)
//! ```
//!
//! No lock is held across extraction. Two jobs racing on the same identity
//! both download and upload; the catalog's unique key lets exactly one insert
//! win and the loser returns the winner's record.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, Span};

use crate::adapters::{BlobUploader, ExtractedAudio, MediaExtractor, UploadMeta, UploadedBlob};
use crate::domain::{CatalogRecord, RecordStatus};
use crate::library::title::{parse_title, TrackInfo};
use crate::library::{self, Catalog, IdentityKey};

use super::error::{CatalogError, IngestError, IngestStage};

/// Default maximum artifact size (50 MB)
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Per-stage limits and destinations for the pipeline
#[derive(Debug, Clone)]
pub struct IngestLimits {
    /// Reject extracted files larger than this
    pub max_bytes: u64,

    /// Root under which each job gets its own scratch directory
    pub scratch_dir: PathBuf,

    /// Blob host destination (chat/channel id) for uploads
    pub destination: String,

    /// Deadline for extraction (download + transcode + probe)
    pub extract_timeout: Duration,

    /// Deadline for the upload
    pub upload_timeout: Duration,

    /// Deadline for each catalog call
    pub persist_timeout: Duration,
}

impl IngestLimits {
    /// Limits with default size and deadlines
    pub fn new(scratch_dir: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            scratch_dir: scratch_dir.into(),
            destination: destination.into(),
            extract_timeout: Duration::from_secs(600),
            upload_timeout: Duration::from_secs(300),
            persist_timeout: Duration::from_secs(30),
        }
    }
}

/// How a job arrived at its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Freshly extracted, uploaded and inserted
    Created,

    /// Already cataloged; nothing was downloaded
    Existing,

    /// A stale record was re-ingested and updated in place
    Reingested,

    /// Lost an insert race; the winner's record was returned
    JoinedExisting,
}

/// Successful result of an ingestion
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: CatalogRecord,
    pub disposition: Disposition,
}

impl IngestOutcome {
    fn new(record: CatalogRecord, disposition: Disposition) -> Self {
        Self {
            record,
            disposition,
        }
    }
}

/// Orchestrates extractor → uploader → catalog for one URL at a time
pub struct IngestionPipeline {
    catalog: Arc<dyn Catalog>,
    extractor: Arc<dyn MediaExtractor>,
    uploader: Arc<dyn BlobUploader>,
    limits: IngestLimits,
}

impl IngestionPipeline {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        extractor: Arc<dyn MediaExtractor>,
        uploader: Arc<dyn BlobUploader>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            catalog,
            extractor,
            uploader,
            limits,
        }
    }

    pub fn limits(&self) -> &IngestLimits {
        &self.limits
    }

    /// Ingest a source URL, returning its catalog record
    #[instrument(skip(self), fields(identity = tracing::field::Empty))]
    pub async fn ingest(&self, source_url: &str) -> Result<IngestOutcome, IngestError> {
        let started = Instant::now();
        let identity = IdentityKey::from_url(source_url)?;
        Span::current().record("identity", identity.as_str());

        // CheckingIdentity
        let stale = match self.lookup_identity(&identity).await? {
            Some(record) if record.status != RecordStatus::Missing => {
                info!("Already cataloged, skipping download");
                return Ok(IngestOutcome::new(record, Disposition::Existing));
            }
            Some(record) => {
                info!(old_blob = %record.blob_ref, "Record marked missing, re-ingesting");
                true
            }
            None => false,
        };

        // Extracting
        let audio = self.extract(source_url).await?;
        let track = parse_title(&audio.raw_title);
        let duration_seconds = audio.duration_seconds;

        // Uploading; the scratch file goes away whatever the outcome
        let uploaded = self.upload(&audio, &track).await;
        audio.discard();
        let uploaded = uploaded?;

        // Persisting
        let outcome = if stale {
            self.replace_stale(&identity, source_url, &track, &uploaded, duration_seconds)
                .await?
        } else {
            let record = CatalogRecord::new(
                identity.as_str(),
                source_url,
                uploaded.blob_ref.clone(),
                uploaded.size_bytes,
            )
            .with_track(track.title.clone(), track.artist.clone())
            .with_duration(duration_seconds);
            self.insert(record).await?
        };

        info!(
            disposition = ?outcome.disposition,
            blob_ref = %outcome.record.blob_ref,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion complete"
        );
        Ok(outcome)
    }

    /// Look up the record for a URL without ingesting
    pub async fn lookup(&self, source_url: &str) -> Result<Option<CatalogRecord>, IngestError> {
        let identity = IdentityKey::from_url(source_url)?;
        self.lookup_identity(&identity).await
    }

    /// Flag the record for a URL as stale so the next ingest re-fetches it
    pub async fn mark_stale(&self, source_url: &str) -> anyhow::Result<IdentityKey> {
        library::mark_stale(self.catalog.as_ref(), source_url).await
    }

    async fn lookup_identity(
        &self,
        identity: &IdentityKey,
    ) -> Result<Option<CatalogRecord>, IngestError> {
        let found = within(
            IngestStage::CheckingIdentity,
            self.limits.persist_timeout,
            async {
                match self.catalog.find_by_identity(identity.as_str()).await {
                    Ok(record) => Ok(Some(record)),
                    Err(CatalogError::NotFound(_)) => Ok(None),
                    Err(e) => Err(persistence(e)),
                }
            },
        )
        .await?;
        Ok(found)
    }

    async fn extract(&self, source_url: &str) -> Result<ExtractedAudio, IngestError> {
        debug!(extractor = self.extractor.name(), "Extracting");
        within(
            IngestStage::Extracting,
            self.limits.extract_timeout,
            self.extractor
                .extract(source_url, &self.limits.scratch_dir, self.limits.max_bytes),
        )
        .await
        .inspect_err(|e| error!(error = %e, "Extraction failed"))
    }

    async fn upload(
        &self,
        audio: &ExtractedAudio,
        track: &TrackInfo,
    ) -> Result<UploadedBlob, IngestError> {
        debug!(uploader = self.uploader.name(), "Uploading");
        let caption = format!(
            "🎵 {} - {}\n\n⏰ {}s",
            track.artist, track.title, audio.duration_seconds
        );
        let meta = UploadMeta {
            title: &track.title,
            artist: &track.artist,
            caption: Some(&caption),
        };

        within(IngestStage::Uploading, self.limits.upload_timeout, async {
            self.uploader
                .upload(&self.limits.destination, &audio.path, meta)
                .await
                .map_err(|e| IngestError::UploadFailed(format!("{:#}", e)))
        })
        .await
        .inspect_err(|e| error!(error = %e, "Upload failed"))
    }

    /// Insert a new record, deferring to the winner on a duplicate identity
    async fn insert(&self, record: CatalogRecord) -> Result<IngestOutcome, IngestError> {
        let limit = self.limits.persist_timeout;
        let identity = record.identity_key.clone();
        let our_blob = record.blob_ref.clone();

        let created = within(IngestStage::Persisting, limit, async {
            match self.catalog.create(record).await {
                Ok(record) => Ok(Some(record)),
                Err(CatalogError::DuplicateIdentity(_)) => Ok(None),
                Err(e) => Err(persistence(e)),
            }
        })
        .await
        .inspect_err(|e| {
            error!(orphaned_blob = %our_blob, error = %e, "Persisting failed, blob orphaned")
        })?;

        if let Some(record) = created {
            return Ok(IngestOutcome::new(record, Disposition::Created));
        }

        info!(discarded_blob = %our_blob, "Lost insert race, returning existing record");
        let winner = within(IngestStage::Persisting, limit, async {
            self.catalog
                .find_by_identity(&identity)
                .await
                .map_err(persistence)
        })
        .await?;
        Ok(IngestOutcome::new(winner, Disposition::JoinedExisting))
    }

    /// Update a stale record in place; recreate it if it vanished meanwhile
    async fn replace_stale(
        &self,
        identity: &IdentityKey,
        source_url: &str,
        track: &TrackInfo,
        uploaded: &UploadedBlob,
        duration_seconds: u32,
    ) -> Result<IngestOutcome, IngestError> {
        let replaced = within(
            IngestStage::Persisting,
            self.limits.persist_timeout,
            async {
                match self
                    .catalog
                    .replace_blob(
                        identity.as_str(),
                        &uploaded.blob_ref,
                        uploaded.size_bytes,
                        duration_seconds,
                    )
                    .await
                {
                    Ok(record) => Ok(Some(record)),
                    Err(CatalogError::NotFound(_)) => Ok(None),
                    Err(e) => Err(persistence(e)),
                }
            },
        )
        .await?;

        match replaced {
            Some(record) => Ok(IngestOutcome::new(record, Disposition::Reingested)),
            None => {
                let record = CatalogRecord::new(
                    identity.as_str(),
                    source_url,
                    uploaded.blob_ref.clone(),
                    uploaded.size_bytes,
                )
                .with_track(track.title.clone(), track.artist.clone())
                .with_duration(duration_seconds);
                self.insert(record).await
            }
        }
    }
}

fn persistence(e: CatalogError) -> IngestError {
    IngestError::PersistenceFailed(e.to_string())
}

/// Bound a stage future by a deadline
async fn within<T, F>(stage: IngestStage, limit: Duration, fut: F) -> Result<T, IngestError>
where
    F: Future<Output = Result<T, IngestError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| IngestError::Timeout {
            stage,
            after: limit,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_maps_overrun_to_timeout() {
        let err = within(IngestStage::Uploading, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, IngestError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Timeout {
                stage: IngestStage::Uploading,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_within_passes_through_results() {
        let ok = within(IngestStage::Extracting, Duration::from_secs(1), async {
            Ok::<_, IngestError>(7)
        })
        .await
        .unwrap();
        assert_eq!(ok, 7);

        let err = within(IngestStage::Extracting, Duration::from_secs(1), async {
            Err::<(), _>(IngestError::extraction("nope"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFailed { .. }));
    }

    #[test]
    fn test_default_limits() {
        let limits = IngestLimits::new("/tmp/scratch", "-100123");
        assert_eq!(limits.max_bytes, 50 * 1024 * 1024);
        assert_eq!(limits.destination, "-100123");
        assert_eq!(limits.extract_timeout, Duration::from_secs(600));
    }
}
