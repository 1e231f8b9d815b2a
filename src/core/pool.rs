//! Bounded worker pool.
//!
//! A fixed number of workers pull jobs from a bounded queue and run each one
//! to completion before taking the next, so at most `workers` jobs (and thus
//! external-process invocations) are in flight at once. Submitting to a full
//! queue waits for a slot. Shutdown stops intake, lets workers drain what was
//! already accepted, and waits for them to exit.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::PoolError;

/// A unit of work: any future that runs to completion and reports success
pub type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PoolSettings {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs that may wait in the queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_workers() -> usize {
    3
}
fn default_queue_capacity() -> usize {
    100
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Counters shared between the pool handle and its workers
#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Fixed-size worker pool over a bounded queue
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    stop: watch::Sender<bool>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    settings: PoolSettings,
}

impl WorkerPool {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(settings: PoolSettings) -> Self {
        let settings = PoolSettings {
            workers: settings.workers.max(1),
            queue_capacity: settings.queue_capacity.max(1),
        };

        let (tx, rx) = mpsc::channel::<Job>(settings.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (stop, _) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let workers = (0..settings.workers)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx), Arc::clone(&counters))))
            .collect();

        info!(
            workers = settings.workers,
            queue_capacity = settings.queue_capacity,
            "Worker pool started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            stop,
            workers: tokio::sync::Mutex::new(workers),
            counters,
            settings,
        }
    }

    /// Queue a job, waiting for a free slot if the queue is full.
    ///
    /// Fails with `Rejected` once shutdown has begun, including for
    /// submitters that were still waiting for a slot at that moment.
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let tx = match lock(&self.sender).as_ref() {
            Some(tx) if !*self.stop.borrow() => tx.clone(),
            _ => return Err(PoolError::Rejected),
        };

        let mut stopped = self.stop.subscribe();
        let permit = tokio::select! {
            biased;
            _ = stopped.wait_for(|stop| *stop) => return Err(PoolError::Rejected),
            permit = tx.reserve() => permit.map_err(|_| PoolError::Rejected)?,
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        permit.send(Box::pin(job));
        Ok(())
    }

    /// Stop accepting jobs and wait for every worker to finish.
    ///
    /// Jobs already in flight or queued run to their own completion. Every
    /// caller waits, including concurrent and repeated ones.
    pub async fn shutdown(&self) {
        if self.stop.send_replace(true) {
            debug!("Worker pool already shutting down");
        }
        drop(lock(&self.sender).take());

        // Held across the awaits so later callers queue behind the drain
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return;
        }

        info!(queued = self.queue_depth(), "Draining worker pool");
        // A handle is only removed once its worker has exited, so a cancelled
        // caller leaves the rest for the next one
        while let Some(handle) = workers.last_mut() {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker exited abnormally");
            }
            workers.pop();
        }
        info!(
            completed = self.completed(),
            failed = self.failed(),
            "Worker pool stopped"
        );
    }

    /// Jobs waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Whether a submit would currently have to wait
    pub fn is_full(&self) -> bool {
        self.queue_depth() >= self.settings.queue_capacity
    }

    /// Jobs currently executing
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// Jobs finished successfully
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Jobs that returned an error or panicked
    pub fn failed(&self) -> usize {
        self.counters.failed.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// Whether shutdown has begun
    pub fn is_shut_down(&self) -> bool {
        *self.stop.borrow()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<Counters>,
) {
    debug!(worker = id, "Worker started");

    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.running.fetch_add(1, Ordering::SeqCst);

        // Run in its own task so a panicking job doesn't take the worker down
        match tokio::spawn(job).await {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker = id, error = %e, "Job failed");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(worker = id, error = %e, "Job panicked");
            }
        }

        counters.running.fetch_sub(1, Ordering::SeqCst);
    }

    debug!(worker = id, "Worker exiting");
}
