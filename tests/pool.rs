//! Worker Pool Integration Tests
//!
//! Tests for the concurrency bound, backpressure on a full queue, shutdown
//! draining, and running ingestion jobs through the pool.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};
use tokio_test::{assert_pending, assert_ready_eq, task};
use uuid::Uuid;

use tunevault::adapters::{
    scratch_dir_in, BlobUploader, ExtractedAudio, MediaExtractor, UploadMeta, UploadedBlob,
};
use tunevault::domain::{ChannelRequester, IngestionJob, JobReport};
use tunevault::{
    IngestError, IngestLimits, IngestionPipeline, PoolError, PoolSettings, SqliteCatalog,
    WorkerPool,
};

/// Jobs that hold until released and record peak concurrency
#[derive(Clone)]
struct Gate {
    permits: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl Gate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn job(&self) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 'static {
        let gate = self.clone();
        async move {
            let now = gate.running.fetch_add(1, Ordering::SeqCst) + 1;
            gate.peak.fetch_max(now, Ordering::SeqCst);
            gate.permits.acquire().await?.forget();
            gate.running.fetch_sub(1, Ordering::SeqCst);
            gate.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Poll `cond` until it holds or a second passes
async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_concurrency_never_exceeds_workers() {
    let pool = WorkerPool::start(PoolSettings {
        workers: 3,
        queue_capacity: 10,
    });
    let gate = Gate::new();

    for _ in 0..8 {
        pool.submit(gate.job()).await.unwrap();
    }

    eventually(|| gate.running() == 3).await;
    gate.release(8);
    pool.shutdown().await;

    assert_eq!(gate.finished(), 8);
    assert_eq!(gate.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_full_queue_blocks_submit() {
    let pool = WorkerPool::start(PoolSettings {
        workers: 2,
        queue_capacity: 1,
    });
    let gate = Gate::new();

    // Two running, one waiting
    for _ in 0..3 {
        pool.submit(gate.job()).await.unwrap();
    }
    eventually(|| gate.running() == 2 && pool.queue_depth() == 1).await;
    assert!(pool.is_full());

    let mut fourth = task::spawn(pool.submit(gate.job()));
    assert_pending!(fourth.poll());

    // Freeing one worker moves the queued job in and makes room
    gate.release(1);
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Poll::Ready(result) = fourth.poll() {
                break result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap()
    .unwrap();
    drop(fourth);

    gate.release(3);
    pool.shutdown().await;
    assert_eq!(gate.finished(), 4);
    assert_eq!(gate.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_shutdown_drains_accepted_jobs() {
    let pool = WorkerPool::start(PoolSettings {
        workers: 1,
        queue_capacity: 5,
    });
    let gate = Gate::new();

    for _ in 0..3 {
        pool.submit(gate.job()).await.unwrap();
    }

    let mut shutdown = task::spawn(pool.shutdown());
    assert_pending!(shutdown.poll());

    // Intake is closed as soon as shutdown begins
    assert!(pool.is_shut_down());
    assert_eq!(pool.submit(gate.job()).await, Err(PoolError::Rejected));

    gate.release(3);
    tokio::time::timeout(Duration::from_secs(1), async {
        while shutdown.poll().is_pending() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(gate.finished(), 3);
}

#[tokio::test]
async fn test_concurrent_shutdown_waits_for_drain() {
    let pool = WorkerPool::start(PoolSettings {
        workers: 1,
        queue_capacity: 2,
    });
    let gate = Gate::new();

    pool.submit(gate.job()).await.unwrap();
    eventually(|| gate.running() == 1).await;

    let mut first = task::spawn(pool.shutdown());
    let mut second = task::spawn(pool.shutdown());
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    // The second caller must not return while the job is still running
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_pending!(second.poll());
    assert_eq!(gate.finished(), 0);

    gate.release(1);
    tokio::time::timeout(Duration::from_secs(1), async {
        let (mut first_done, mut second_done) = (false, false);
        while !(first_done && second_done) {
            first_done = first_done || first.poll().is_ready();
            if !second_done && second.poll().is_ready() {
                assert_eq!(gate.finished(), 1);
                second_done = true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_shutdown_rejects_blocked_submitter() {
    let pool = WorkerPool::start(PoolSettings {
        workers: 1,
        queue_capacity: 1,
    });
    let gate = Gate::new();

    pool.submit(gate.job()).await.unwrap();
    pool.submit(gate.job()).await.unwrap();
    eventually(|| gate.running() == 1 && pool.is_full()).await;

    let mut blocked = task::spawn(pool.submit(gate.job()));
    assert_pending!(blocked.poll());

    let mut shutdown = task::spawn(pool.shutdown());
    assert_pending!(shutdown.poll());

    assert!(blocked.is_woken());
    assert_ready_eq!(blocked.poll(), Err(PoolError::Rejected));

    gate.release(2);
    tokio::time::timeout(Duration::from_secs(1), async {
        while shutdown.poll().is_pending() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(gate.finished(), 2);
}

struct SlowExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl MediaExtractor for SlowExtractor {
    fn name(&self) -> &str {
        "slow"
    }

    async fn extract(
        &self,
        source_url: &str,
        scratch_root: &Path,
        max_bytes: u64,
    ) -> Result<ExtractedAudio, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scratch =
            scratch_dir_in(scratch_root).map_err(|e| IngestError::extraction(e.to_string()))?;
        let path = scratch.path().join("audio.mp3");
        std::fs::write(&path, source_url.as_bytes()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        ExtractedAudio::from_scratch(scratch, path, "Band - Tune", max_bytes)
    }
}

struct CountingUploader {
    uploads: AtomicUsize,
}

#[async_trait]
impl BlobUploader for CountingUploader {
    fn name(&self) -> &str {
        "counting"
    }

    async fn upload(
        &self,
        _destination: &str,
        path: &Path,
        _meta: UploadMeta<'_>,
    ) -> anyhow::Result<UploadedBlob> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(UploadedBlob {
            blob_ref: format!("blob-{}", n),
            size_bytes: std::fs::metadata(path)?.len(),
        })
    }
}

#[tokio::test]
async fn test_pool_runs_ingestion_jobs() {
    let temp = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::in_memory().unwrap());
    let pipeline = Arc::new(IngestionPipeline::new(
        catalog.clone(),
        Arc::new(SlowExtractor {
            calls: AtomicUsize::new(0),
        }),
        Arc::new(CountingUploader {
            uploads: AtomicUsize::new(0),
        }),
        IngestLimits::new(temp.path().join("scratch"), "-100123"),
    ));
    let pool = WorkerPool::start(PoolSettings {
        workers: 3,
        queue_capacity: 2,
    });

    let urls = [
        "https://youtu.be/aaa",
        "https://youtu.be/bbb",
        "https://youtu.be/aaa",
        "https://youtu.be/ccc",
        "https://youtu.be/aaa#again",
        "https://youtu.be/bbb/",
    ];

    let (tx, mut rx) = mpsc::unbounded_channel::<JobReport>();
    for url in urls {
        let id = Uuid::new_v4();
        let job = IngestionJob::with_id(id, url, ChannelRequester::new(id, tx.clone()));
        let pipeline = Arc::clone(&pipeline);
        pool.submit(async move {
            job.run(&pipeline)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        })
        .await
        .unwrap();
    }
    drop(tx);
    pool.shutdown().await;

    let mut reports = Vec::new();
    while let Some(report) = rx.recv().await {
        reports.push(report);
    }

    assert_eq!(reports.len(), urls.len());
    assert!(reports.iter().all(|r| r.result.is_ok()));
    // Three distinct sources, one record each regardless of interleaving
    assert_eq!(catalog.count().await.unwrap(), 3);

    let blob_for = |prefix: &str| -> Vec<String> {
        reports
            .iter()
            .filter(|r| r.source_url.starts_with(prefix))
            .map(|r| r.result.as_ref().unwrap().record.blob_ref.clone())
            .collect()
    };
    let aaa = blob_for("https://youtu.be/aaa");
    assert_eq!(aaa.len(), 3);
    assert!(aaa.iter().all(|b| *b == aaa[0]));

    let leftovers = std::fs::read_dir(temp.path().join("scratch"))
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
