//! Batch job tracking.
//!
//! [`BatchTracker::submit_batch`] records a job, starts processing it in the
//! background and returns the job id at once. Callers poll
//! [`BatchTracker::get_status`] or await [`BatchTracker::wait`].
//!
//! ## State machines
//!
//! ```text
//! file: pending ─▶ processing ─▶ completed | error
//! job:  pending ─▶ processing ─▶ completed | error
//! ```
//!
//! A file error is recorded on that file and processing continues; the job
//! still completes. A panic while extracting one file is caught and recorded
//! as that file's error. A job ends in `error` only when the job loop itself
//! dies.
//!
//! `processed_files` is incremented in the same map update that sets a
//! file's terminal status, so a snapshot never counts a file that is not
//! terminal. Snapshots carry no extraction payloads; fetch those with
//! [`BatchTracker::result`].
//!
//! Job records are kept for the life of the tracker.

use crate::config::BatchOptions;
use crate::error::ExtractError;
use crate::extractor::CachedExtractor;
use crate::output::ExtractionResult;
use crate::pipeline::DocumentInput;
use crate::progress::ProgressCallback;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A document submitted as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFile {
    /// Read from disk when its turn comes.
    Path(PathBuf),
    /// Already in memory.
    Buffer { filename: String, bytes: Vec<u8> },
}

impl BatchFile {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn buffer(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Buffer {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    fn display_path(&self) -> String {
        match self {
            Self::Path(p) => p.display().to_string(),
            Self::Buffer { filename, .. } => filename.clone(),
        }
    }

    fn filename(&self) -> String {
        match self {
            Self::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            Self::Buffer { filename, .. } => filename.clone(),
        }
    }

    async fn load(self) -> Result<DocumentInput, ExtractError> {
        match self {
            Self::Path(p) => DocumentInput::from_path(p).await,
            Self::Buffer { filename, bytes } => Ok(DocumentInput::from_bytes(filename, bytes)),
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Status of one file in a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// One file's progress within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTask {
    pub path: String,
    pub filename: String,
    pub status: FileStatus,
    pub error: Option<String>,
}

/// Snapshot of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub id: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub status: JobStatus,
    pub files: Vec<FileTask>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Why the job failed, when `status` is `error`.
    pub error: Option<String>,
}

impl BatchStatus {
    /// `processed_files / total_files * 100`; 100 for an empty batch.
    pub fn progress_percent(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        self.processed_files as f64 / self.total_files as f64 * 100.0
    }

    pub fn completed_files(&self) -> usize {
        self.count(FileStatus::Completed)
    }

    pub fn failed_files(&self) -> usize {
        self.count(FileStatus::Error)
    }

    fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

struct TrackerInner {
    extractor: Arc<CachedExtractor>,
    jobs: DashMap<String, BatchStatus>,
    results: DashMap<(String, usize), ExtractionResult>,
    watchers: DashMap<String, watch::Sender<JobStatus>>,
    progress: Option<ProgressCallback>,
}

/// Runs batches of extractions and tracks their progress.
///
/// Cloning is cheap; clones share the job table.
#[derive(Clone)]
pub struct BatchTracker {
    inner: Arc<TrackerInner>,
}

impl BatchTracker {
    pub fn new(extractor: Arc<CachedExtractor>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                extractor,
                jobs: DashMap::new(),
                results: DashMap::new(),
                watchers: DashMap::new(),
                progress: None,
            }),
        }
    }

    /// Receive per-file events for every batch this tracker runs.
    ///
    /// Must be called before the tracker is cloned or used.
    pub fn with_progress_callback(self, callback: ProgressCallback) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.progress = Some(callback);
                inner
            }
            Err(shared) => {
                warn!("Progress callback ignored: tracker already shared");
                return Self { inner: shared };
            }
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Record a job for `files` and start processing it in the background.
    ///
    /// Returns the job id immediately. Must be called within a Tokio runtime.
    pub fn submit_batch(&self, files: Vec<BatchFile>, options: BatchOptions) -> String {
        let id = Uuid::new_v4().to_string();
        let job = BatchStatus {
            id: id.clone(),
            total_files: files.len(),
            processed_files: 0,
            status: JobStatus::Pending,
            files: files
                .iter()
                .map(|f| FileTask {
                    path: f.display_path(),
                    filename: f.filename(),
                    status: FileStatus::Pending,
                    error: None,
                })
                .collect(),
            start_time: Utc::now(),
            end_time: None,
            error: None,
        };
        self.inner.jobs.insert(id.clone(), job);
        let (tx, _rx) = watch::channel(JobStatus::Pending);
        self.inner.watchers.insert(id.clone(), tx);
        info!("Batch {} submitted with {} files", id, files.len());

        let inner = Arc::clone(&self.inner);
        let job_id = id.clone();
        tokio::spawn(async move {
            let worker = tokio::spawn(run_job(Arc::clone(&inner), job_id.clone(), files, options));
            if let Err(e) = worker.await {
                error!("Batch {} worker died: {}", job_id, e);
                inner.fail_job(&job_id, format!("batch worker failed: {}", e));
            }
        });

        id
    }

    /// Snapshot of a job, or `None` for an unknown id.
    pub fn get_status(&self, batch_id: &str) -> Option<BatchStatus> {
        self.inner.jobs.get(batch_id).map(|job| job.value().clone())
    }

    /// Full extraction result of file `index` in a job, once completed.
    pub fn result(&self, batch_id: &str, index: usize) -> Option<ExtractionResult> {
        self.inner
            .results
            .get(&(batch_id.to_string(), index))
            .map(|r| r.value().clone())
    }

    /// Wait until the job reaches a terminal state and return its snapshot.
    pub async fn wait(&self, batch_id: &str) -> Option<BatchStatus> {
        let mut rx = self.inner.watchers.get(batch_id)?.subscribe();
        if rx.wait_for(|status| status.is_terminal()).await.is_err() {
            warn!("Batch {} status channel closed", batch_id);
        }
        self.get_status(batch_id)
    }

    /// Ids of all known jobs.
    pub fn job_ids(&self) -> Vec<String> {
        self.inner.jobs.iter().map(|j| j.key().clone()).collect()
    }
}

impl TrackerInner {
    fn set_job_status(&self, id: &str, status: JobStatus) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status.is_terminal() {
                return;
            }
            job.status = status;
            if status.is_terminal() {
                job.end_time = Some(Utc::now());
            }
        }
        if let Some(tx) = self.watchers.get(id) {
            tx.send_replace(status);
        }
    }

    fn fail_job(&self, id: &str, reason: String) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status.is_terminal() {
                return;
            }
            job.error = Some(reason);
        }
        self.set_job_status(id, JobStatus::Error);
    }

    fn start_file(&self, id: &str, index: usize) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if let Some(task) = job.files.get_mut(index) {
                if task.status == FileStatus::Pending {
                    task.status = FileStatus::Processing;
                }
            }
        }
    }

    /// Set a file's terminal state and count it, in one update.
    fn finish_file(&self, id: &str, index: usize, outcome: Result<(), String>) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            let Some(task) = job.files.get_mut(index) else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            match outcome {
                Ok(()) => task.status = FileStatus::Completed,
                Err(e) => {
                    task.status = FileStatus::Error;
                    task.error = Some(e);
                }
            }
            job.processed_files += 1;
        }
    }
}

async fn run_job(inner: Arc<TrackerInner>, id: String, files: Vec<BatchFile>, options: BatchOptions) {
    let total = files.len();
    inner.set_job_status(&id, JobStatus::Processing);
    if let Some(cb) = &inner.progress {
        cb.on_batch_start(&id, total);
    }

    stream::iter(files.into_iter().enumerate())
        .map(|(index, file)| process_file(&inner, &id, index, total, file, &options))
        .buffer_unordered(options.concurrency.max(1))
        .collect::<Vec<()>>()
        .await;

    if let Some(job) = inner.jobs.get(&id).map(|j| j.value().clone()) {
        info!(
            "Batch {} completed: {} ok, {} failed",
            id,
            job.completed_files(),
            job.failed_files()
        );
        // Runs before `wait` callers are released.
        if let Some(cb) = &inner.progress {
            cb.on_batch_complete(&id, job.completed_files(), job.failed_files());
        }
    }
    inner.set_job_status(&id, JobStatus::Completed);
}

async fn process_file(
    inner: &TrackerInner,
    id: &str,
    index: usize,
    total: usize,
    file: BatchFile,
    options: &BatchOptions,
) {
    let filename = file.filename();
    inner.start_file(id, index);
    if let Some(cb) = &inner.progress {
        cb.on_file_start(id, index, total, &filename);
    }

    let work = async {
        let input = file.load().await?;
        inner
            .extractor
            .extract_cached(&input, &options.extraction)
            .await
    };
    // A panic fails this file only; the rest of the batch keeps going.
    let outcome = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Batch {}: {} panicked: {}", id, filename, message);
            Err(ExtractError::Internal(format!("extraction panicked: {}", message)))
        }
    };

    match outcome {
        Ok(result) => {
            inner.results.insert((id.to_string(), index), result);
            inner.finish_file(id, index, Ok(()));
            if let Some(cb) = &inner.progress {
                cb.on_file_complete(id, index, total, &filename);
            }
        }
        Err(e) => {
            let message = e.to_string();
            warn!("Batch {}: {} failed: {}", id, filename, message);
            inner.finish_file(id, index, Err(message.clone()));
            if let Some(cb) = &inner.progress {
                cb.on_file_error(id, index, total, &filename, &message);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
