//! Ingestion jobs and result delivery.
//!
//! A job is transient: created when a request arrives, dropped after it runs.
//! Nothing about it is persisted; the outcome goes straight back to whoever
//! asked through their `Requester`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::core::{IngestError, IngestOutcome, IngestionPipeline};

/// Outcome of one ingestion job
pub type JobResult = Result<IngestOutcome, IngestError>;

/// Receives the outcome of a job on behalf of whoever submitted it
#[async_trait]
pub trait Requester: Send + Sync {
    /// Report the result; delivery problems are the requester's to log
    async fn deliver(&self, source_url: &str, result: &JobResult);
}

/// Report sent through a channel requester
#[derive(Debug)]
pub struct JobReport {
    pub job_id: Uuid,
    pub source_url: String,
    pub result: JobResult,
}

/// Channel-backed requester, pairing each report with the job it came from
pub struct ChannelRequester {
    job_id: Uuid,
    tx: mpsc::UnboundedSender<JobReport>,
}

impl ChannelRequester {
    pub fn new(job_id: Uuid, tx: mpsc::UnboundedSender<JobReport>) -> Self {
        Self { job_id, tx }
    }
}

#[async_trait]
impl Requester for ChannelRequester {
    async fn deliver(&self, source_url: &str, result: &JobResult) {
        // Receiver gone means nobody is waiting any more
        let _ = self.tx.send(JobReport {
            job_id: self.job_id,
            source_url: source_url.to_string(),
            result: result.clone(),
        });
    }
}

/// A unit of work for the worker pool
pub struct IngestionJob<R> {
    /// Correlation id for logs
    pub id: Uuid,

    /// URL to ingest
    pub source_url: String,

    /// Opaque delivery target, not interpreted by the pipeline
    pub requester: R,
}

impl<R: Requester> IngestionJob<R> {
    /// Create a job with a fresh id
    pub fn new(source_url: impl Into<String>, requester: R) -> Self {
        Self::with_id(Uuid::new_v4(), source_url, requester)
    }

    pub fn with_id(id: Uuid, source_url: impl Into<String>, requester: R) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            requester,
        }
    }

    /// Run the pipeline for this job and hand the result to the requester
    pub async fn run(self, pipeline: &IngestionPipeline) -> JobResult {
        let span = info_span!("job", job_id = %self.id);
        async move {
            let result = pipeline.ingest(&self.source_url).await;
            self.requester.deliver(&self.source_url, &result).await;
            result
        }
        .instrument(span)
        .await
    }
}
