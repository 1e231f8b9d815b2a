//! Command-line interface for tunevault.
//!
//! Provides commands for ingesting single URLs or batches through the worker
//! pool, inspecting catalog records, and flagging stale blobs for
//! re-ingestion.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapters::{FfprobeProbe, TelegramClient, TelegramRequester, YtDlpExtractor};
use crate::config::{self, ResolvedConfig};
use crate::core::{CatalogError, Disposition, IngestionPipeline, PoolSettings, WorkerPool};
use crate::domain::{CatalogRecord, ChannelRequester, IngestionJob, JobReport, JobResult, Requester};
use crate::library::{
    identity, infer_region, is_supported_source, mark_stale, normalize_url, Catalog,
    SqliteCatalog,
};

/// tunevault - deduplicating audio ingestion into a Telegram-backed catalog
#[derive(Parser, Debug)]
#[command(name = "tunevault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a single URL and wait for the result
    Ingest {
        /// Source URL
        url: String,

        /// Also deliver the result to this Telegram chat
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Ingest every URL in a file (one per line) through the worker pool
    Batch {
        /// File with URLs ("-" reads stdin)
        file: PathBuf,

        /// Number of concurrent workers (default from config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Queue capacity (default from config)
        #[arg(short, long)]
        queue: Option<usize>,
    },

    /// Flag a URL's stored blob as stale so the next ingest re-fetches it
    MarkMissing {
        /// Source URL
        url: String,
    },

    /// Show the catalog record for a URL
    Show {
        /// Source URL
        url: String,
    },

    /// Print the normalized URL and identity key
    Identity {
        /// Source URL
        url: String,
    },

    /// List records waiting for re-ingestion
    Missing {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ingest { url, reply_to } => ingest_url(&url, reply_to).await,
            Commands::Batch {
                file,
                workers,
                queue,
            } => run_batch(file, workers, queue).await,
            Commands::MarkMissing { url } => mark_missing(&url).await,
            Commands::Show { url } => show_record(&url).await,
            Commands::Identity { url } => show_identity(&url),
            Commands::Missing { limit } => list_missing(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Prints job results to the terminal
struct ConsoleRequester;

#[async_trait]
impl Requester for ConsoleRequester {
    async fn deliver(&self, source_url: &str, result: &JobResult) {
        print_result(source_url, result);
    }
}

fn print_result(source_url: &str, result: &JobResult) {
    match result {
        Ok(outcome) => {
            let label = match outcome.disposition {
                Disposition::Created => "ingested",
                Disposition::Existing => "already cataloged",
                Disposition::Reingested => "re-ingested",
                Disposition::JoinedExisting => "ingested concurrently",
            };
            println!(
                "✅ {} - {} ({})",
                outcome.record.artist, outcome.record.title, label
            );
            println!("   {}", source_url);
        }
        Err(e) => {
            println!("❌ {}", source_url);
            println!("   [{}] {}", e.stage(), e);
        }
    }
}

fn open_catalog(cfg: &ResolvedConfig) -> Result<SqliteCatalog> {
    SqliteCatalog::open(&cfg.database)
}

/// Wire the real adapters into a pipeline
fn build_pipeline(cfg: &ResolvedConfig) -> Result<(IngestionPipeline, Arc<TelegramClient>)> {
    let telegram = Arc::new(TelegramClient::from_config(cfg.telegram()?));
    let catalog = Arc::new(open_catalog(cfg)?);

    let probe = Arc::new(FfprobeProbe::new(cfg.tools.ffprobe.clone()));
    let extractor = YtDlpExtractor::new(cfg.tools.ytdlp.clone(), probe)
        .with_cookies(cfg.tools.cookies_file.clone())
        .with_max_duration(cfg.limits.max_duration_seconds)
        .with_probe_timeout(std::time::Duration::from_secs(
            cfg.limits.probe_timeout_seconds,
        ));

    let pipeline = IngestionPipeline::new(
        catalog,
        Arc::new(extractor),
        telegram.clone(),
        cfg.limits(),
    );
    Ok((pipeline, telegram))
}

fn ensure_supported(url: &str) -> Result<()> {
    if !is_supported_source(url) {
        anyhow::bail!("Unsupported source: {}", url);
    }
    Ok(())
}

/// Ingest one URL in the foreground
async fn ingest_url(url: &str, reply_to: Option<String>) -> Result<()> {
    ensure_supported(url)?;
    let cfg = config::config()?;
    let (pipeline, telegram) = build_pipeline(cfg)?;

    eprintln!("📥 Ingesting: {}", url);
    let result = IngestionJob::new(url, ConsoleRequester).run(&pipeline).await;

    if let Some(chat_id) = reply_to {
        TelegramRequester::new(telegram, chat_id)
            .deliver(url, &result)
            .await;
    }

    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

/// Read URLs from a file or stdin, skipping blanks and comments
fn read_urls(file: &Path) -> Result<Vec<String>> {
    let content = if file.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read URLs from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read URL file: {}", file.display()))?
    };

    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Submit every URL to the worker pool and report when all are done
async fn run_batch(file: PathBuf, workers: Option<usize>, queue: Option<usize>) -> Result<()> {
    let cfg = config::config()?;
    let urls = read_urls(&file)?;

    let (supported, skipped): (Vec<String>, Vec<String>) =
        urls.into_iter().partition(|u| is_supported_source(u));
    for url in &skipped {
        eprintln!("⚠️  Skipping unsupported source: {}", url);
    }
    if supported.is_empty() {
        println!("No URLs to ingest.");
        return Ok(());
    }

    let (pipeline, _) = build_pipeline(cfg)?;
    let pipeline = Arc::new(pipeline);

    let defaults = cfg.pool_settings();
    let pool = WorkerPool::start(PoolSettings {
        workers: workers.unwrap_or(defaults.workers),
        queue_capacity: queue.unwrap_or(defaults.queue_capacity),
    });

    eprintln!(
        "📥 Ingesting {} URL(s) with {} worker(s)",
        supported.len(),
        pool.settings().workers
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<JobReport>();
    for url in supported {
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
        .context("Worker pool rejected job")?;
    }
    drop(tx);

    pool.shutdown().await;

    let mut failed = 0usize;
    let mut total = 0usize;
    while let Some(report) = rx.recv().await {
        total += 1;
        if report.result.is_err() {
            failed += 1;
        }
        print_result(&report.source_url, &report.result);
    }

    println!("\nTotal: {} | ok: {} | failed: {}", total, total - failed, failed);
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn mark_missing(url: &str) -> Result<()> {
    let cfg = config::config()?;
    let catalog = open_catalog(cfg)?;
    let key = mark_stale(&catalog, url).await?;
    println!("Marked missing: {} ({})", url, key);
    Ok(())
}

fn print_record(record: &CatalogRecord) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  Identity:  {}", record.identity_key);
    println!("  Title:     {}", record.title);
    println!("  Artist:    {}", record.artist);
    println!("  Region:    {}", infer_region(&record.artist));
    println!("  Duration:  {}s", record.duration_seconds);
    println!("  Size:      {} bytes", record.size_bytes);
    println!("  Status:    {}", record.status);
    println!("  Blob:      {}", record.blob_ref);
    println!("  Source:    {}", record.source_url);
    println!("  Created:   {}", record.created_at);
    println!("  Updated:   {}", record.updated_at);
    println!("╚══════════════════════════════════════════════════════════════╝");
}

async fn show_record(url: &str) -> Result<()> {
    let cfg = config::config()?;
    let catalog = open_catalog(cfg)?;
    let key = identity(url)?;

    match catalog.find_by_identity(key.as_str()).await {
        Ok(record) => {
            print_record(&record);
            Ok(())
        }
        Err(CatalogError::NotFound(_)) => {
            println!("Not cataloged: {} ({})", url, key);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn show_identity(url: &str) -> Result<()> {
    let normalized = normalize_url(url)?;
    let key = identity(url)?;

    println!("Normalized: {}", normalized);
    println!("Identity:   {}", key);
    println!(
        "Supported:  {}",
        if is_supported_source(url) { "yes" } else { "no" }
    );
    Ok(())
}

async fn list_missing(limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let catalog = open_catalog(cfg)?;
    let records = catalog.list_missing(limit).await?;

    if records.is_empty() {
        println!("No records are marked missing.");
        return Ok(());
    }

    println!("{:<34} {:<40}", "IDENTITY", "TITLE");
    println!("{}", "-".repeat(80));
    for record in &records {
        let title = format!("{} - {}", record.artist, record.title);
        let title_truncated = if title.chars().count() > 37 {
            format!("{}...", title.chars().take(37).collect::<String>())
        } else {
            title
        };
        println!("{:<34} {:<40}", record.identity_key, title_truncated);
    }

    println!("\nMissing: {} of {} records", records.len(), catalog.count().await?);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  tunevault Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Scratch:  {}", cfg.scratch_dir.display());
    println!("  Catalog:  {}", cfg.database.display());
    println!();
    println!("Tools:");
    println!("  yt-dlp:   {}", cfg.tools.ytdlp);
    println!("  ffprobe:  {}", cfg.tools.ffprobe);
    if let Some(cookies) = &cfg.tools.cookies_file {
        println!("  Cookies:  {}", cookies.display());
    }
    println!();
    println!("Limits:");
    println!("  Max file size:    {} bytes", cfg.limits.max_file_size_bytes);
    if let Some(max) = cfg.limits.max_duration_seconds {
        println!("  Max duration:     {}s", max);
    }
    println!("  Extract timeout:  {}s", cfg.limits.extract_timeout_seconds);
    println!("  Probe timeout:    {}s", cfg.limits.probe_timeout_seconds);
    println!("  Upload timeout:   {}s", cfg.limits.upload_timeout_seconds);
    println!("  Persist timeout:  {}s", cfg.limits.persist_timeout_seconds);
    println!();
    println!("Pool:");
    println!("  Workers:         {}", cfg.pool.workers);
    println!("  Queue capacity:  {}", cfg.pool.queue_capacity);
    println!();
    match &cfg.telegram {
        Some(t) => println!("Telegram: storage chat {}", t.chat_id),
        None => println!("Telegram: (not configured)"),
    }

    Ok(())
}
