//! Batch job lifecycle over fake capabilities.

mod common;

use common::{ledger_text, memory_extractor, FakeParser};
use ledgerdoc::{
    BatchFile, BatchOptions, BatchProgressCallback, BatchTracker, FileStatus, JobStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn tracker(parser: Arc<FakeParser>) -> BatchTracker {
    let (_store, extractor) = memory_extractor(parser, None);
    BatchTracker::new(Arc::new(extractor))
}

fn ledger(name: &str, suffix: &str) -> BatchFile {
    BatchFile::buffer(name, format!("{}{}", ledger_text(), suffix).into_bytes())
}

#[tokio::test]
async fn submit_returns_before_processing() {
    let tracker = tracker(FakeParser::new());
    let id = tracker.submit_batch(vec![ledger("a.pdf", "a")], BatchOptions::for_tenant("acme"));

    let status = tracker.get_status(&id).unwrap();
    assert_eq!(status.status, JobStatus::Pending);
    assert_eq!(status.total_files, 1);
    assert_eq!(status.processed_files, 0);
    assert_eq!(status.files[0].status, FileStatus::Pending);
    assert!(status.end_time.is_none());
}

#[tokio::test]
async fn all_files_complete() {
    let tracker = tracker(FakeParser::new());
    let files = vec![ledger("a.pdf", "a"), ledger("b.pdf", "b"), ledger("c.pdf", "c")];
    let id = tracker.submit_batch(files, BatchOptions::for_tenant("acme"));

    let status = tracker.wait(&id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.processed_files, 3);
    assert_eq!(status.progress_percent(), 100.0);
    assert!(status.end_time.is_some());
    assert!(status.files.iter().all(|f| f.status == FileStatus::Completed));

    let result = tracker.result(&id, 1).unwrap();
    assert!(result.text.ends_with('b'));
    assert!(tracker.result(&id, 3).is_none());
}

#[tokio::test]
async fn file_error_does_not_fail_the_job() {
    let tracker = tracker(FakeParser::new());
    let files = vec![
        ledger("a.pdf", "a"),
        BatchFile::buffer("broken.pdf", b"CORRUPT%PDF-1.4".to_vec()),
        ledger("c.pdf", "c"),
    ];
    let id = tracker.submit_batch(files, BatchOptions::for_tenant("acme"));

    let status = tracker.wait(&id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.processed_files, 3);
    assert_eq!(status.completed_files(), 2);
    assert_eq!(status.failed_files(), 1);

    let broken = &status.files[1];
    assert_eq!(broken.status, FileStatus::Error);
    assert!(broken.error.as_deref().unwrap().contains("broken xref table"));
    assert!(tracker.result(&id, 1).is_none());
}

#[tokio::test]
async fn missing_path_is_a_file_error() {
    let tracker = tracker(FakeParser::new());
    let files = vec![BatchFile::path("/nonexistent/ledgerdoc/q4.pdf")];
    let id = tracker.submit_batch(files, BatchOptions::for_tenant("acme"));

    let status = tracker.wait(&id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.files[0].filename, "q4.pdf");
    assert_eq!(status.files[0].status, FileStatus::Error);
}

#[tokio::test]
async fn panicking_file_is_recorded_and_batch_continues() {
    let tracker = tracker(FakeParser::new());
    let files = vec![
        ledger("a.pdf", "a"),
        BatchFile::buffer("bomb.pdf", b"PANIC".to_vec()),
        ledger("c.pdf", "c"),
    ];
    let options = BatchOptions {
        concurrency: 1,
        ..BatchOptions::for_tenant("acme")
    };
    let id = tracker.submit_batch(files, options);

    let status = tracker.wait(&id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.error.is_none());
    assert_eq!(status.processed_files, 3);
    assert_eq!(status.completed_files(), 2);
    assert_eq!(status.failed_files(), 1);

    let bomb = &status.files[1];
    assert_eq!(bomb.status, FileStatus::Error);
    assert!(bomb.error.as_deref().unwrap().contains("parser exploded"));
    assert_eq!(status.files[2].status, FileStatus::Completed);
    assert!(tracker.result(&id, 1).is_none());
    assert!(tracker.result(&id, 2).unwrap().text.ends_with('c'));
}

#[tokio::test]
async fn empty_batch_completes() {
    let tracker = tracker(FakeParser::new());
    let id = tracker.submit_batch(Vec::new(), BatchOptions::for_tenant("acme"));

    let status = tracker.wait(&id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress_percent(), 100.0);
}

#[tokio::test]
async fn unknown_batch_is_none() {
    let tracker = tracker(FakeParser::new());
    assert!(tracker.get_status("no-such-batch").is_none());
    assert!(tracker.wait("no-such-batch").await.is_none());
}

#[tokio::test]
async fn processed_count_never_decreases() {
    let tracker = tracker(FakeParser::with_delay(Duration::from_millis(10)));
    let files = (0..5).map(|i| ledger(&format!("{i}.pdf"), &i.to_string())).collect();
    let id = tracker.submit_batch(files, BatchOptions::for_tenant("acme").concurrency(2));

    let mut seen = Vec::new();
    loop {
        let status = tracker.get_status(&id).unwrap();
        let terminal = status.files.iter().filter(|f| f.status.is_terminal()).count();
        assert_eq!(status.processed_files, terminal);
        seen.push(status.processed_files);
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(5));
}

#[tokio::test]
async fn duplicate_files_hit_the_cache() {
    let parser = FakeParser::new();
    let tracker = tracker(parser.clone());
    let files = vec![ledger("a.pdf", "same"), ledger("copy-of-a.pdf", "same")];
    let id = tracker.submit_batch(files, BatchOptions::for_tenant("acme"));

    let status = tracker.wait(&id).await.unwrap();
    assert_eq!(status.completed_files(), 2);
    assert_eq!(parser.calls(), 1);
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    batch_done: AtomicUsize,
}

impl BatchProgressCallback for Recorder {
    fn on_file_start(&self, _: &str, _: usize, _: usize, _: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_complete(&self, _: &str, _: usize, _: usize, _: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_error(&self, _: &str, _: usize, _: usize, _: &str, _: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_complete(&self, _: &str, _: usize, _: usize) {
        self.batch_done.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_file() {
    let recorder = Arc::new(Recorder::default());
    let (_store, extractor) = memory_extractor(FakeParser::new(), None);
    let tracker =
        BatchTracker::new(Arc::new(extractor)).with_progress_callback(recorder.clone());

    let files = vec![
        ledger("a.pdf", "a"),
        BatchFile::buffer("broken.pdf", b"CORRUPT".to_vec()),
    ];
    let id = tracker.submit_batch(files, BatchOptions::for_tenant("acme"));
    tracker.wait(&id).await.unwrap();

    assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.batch_done.load(Ordering::SeqCst), 1);
}
