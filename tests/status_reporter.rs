//! Integration tests for the status reporter: background sampling and
//! flushing against an in-memory store and a scripted shell.

use async_trait::async_trait;
use pipeline_runner::adapters::{
    CommandExecutor, CommandOutput, ExecError, ExecOptions, MemoryObjectStore,
};
use pipeline_runner::core::{
    LogEntry, LogPayload, ReporterError, SamplingConfig, StatusReporter, StatusTarget,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

const STATUS_KEY: &str = "status/job-42.json";

/// Answers the memory pipeline with a fixed reading and counts calls.
struct FixedMemory {
    stdout: &'static str,
    calls: AtomicUsize,
}

impl FixedMemory {
    fn new(stdout: &'static str) -> Arc<Self> {
        Arc::new(Self {
            stdout,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CommandExecutor for FixedMemory {
    async fn execute(
        &self,
        _command: &str,
        _options: &ExecOptions,
    ) -> Result<CommandOutput, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommandOutput {
            stdout: self.stdout.to_string(),
            stderr: String::new(),
        })
    }
}

fn reporter(store: &MemoryObjectStore, executor: Arc<dyn CommandExecutor>) -> StatusReporter {
    StatusReporter::new(
        Arc::new(store.clone()),
        executor,
        StatusTarget::for_job("bucket", "job-42"),
    )
}

fn stored_document(store: &MemoryObjectStore) -> Vec<Value> {
    let body = store
        .object("bucket", STATUS_KEY)
        .expect("status document was never uploaded");
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_sampling_and_flushing() {
    let store = MemoryObjectStore::new();
    // No process matches, so sampling runs but never appends.
    let reporter = reporter(&store, FixedMemory::new(""));

    reporter
        .start_sampling(SamplingConfig::memory(Duration::from_millis(100), "nothing"))
        .unwrap();
    reporter.start_flushing(Duration::from_millis(50)).unwrap();

    reporter.log("a", None);
    sleep(Duration::from_millis(60)).await;
    reporter.log("b", None);
    sleep(Duration::from_millis(60)).await;

    reporter.stop_sampling();
    let summary = reporter.stop_flushing().await.unwrap();

    assert!(store.put_count() >= 2);
    assert_eq!(summary.uploads as usize, store.put_count());

    let document = stored_document(&store);
    assert_eq!(document.len(), 2);
    assert_eq!(document[0]["message"], "a");
    assert_eq!(document[1]["message"], "b");
    assert!(store.puts().iter().all(|p| p.key == STATUS_KEY));
}

#[tokio::test(start_paused = true)]
async fn test_uploaded_entries_keep_call_order_with_samples_interleaved() {
    let store = MemoryObjectStore::new();
    let reporter = reporter(&store, FixedMemory::new("4096\n"));

    reporter
        .start_sampling(SamplingConfig::memory(Duration::from_millis(15), "worker"))
        .unwrap();
    reporter.start_flushing(Duration::from_millis(10)).unwrap();

    for i in 0..10 {
        reporter.log(format!("step {}", i), Some(json!({ "i": i })));
        sleep(Duration::from_millis(7)).await;
    }

    reporter.stop_sampling();
    reporter.stop_flushing().await;

    let document: Vec<LogEntry> =
        serde_json::from_slice(&store.object("bucket", STATUS_KEY).unwrap()).unwrap();
    let published: Vec<_> = document.iter().map(|e| e.message.clone()).collect();
    let buffered: Vec<_> = reporter.entries().into_iter().map(|e| e.message).collect();
    assert_eq!(published, buffered);

    let steps: Vec<_> = document
        .iter()
        .filter(|e| matches!(e.payload, LogPayload::Message { .. }))
        .map(|e| e.message.clone())
        .collect();
    let expected: Vec<_> = (0..10).map(|i| format!("step {}", i)).collect();
    assert_eq!(steps, expected);

    assert!(document
        .iter()
        .any(|e| matches!(e.payload, LogPayload::MemorySample { kilobytes: 4096, .. })));
    assert!(document.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test(start_paused = true)]
async fn test_no_uploads_after_drain() {
    let store = MemoryObjectStore::new();
    let reporter = reporter(&store, FixedMemory::new(""));
    reporter.start_flushing(Duration::from_millis(1000)).unwrap();

    reporter.log("before stop", None);
    reporter.stop_flushing().await;

    let puts_at_drain = store.put_count();
    assert_eq!(puts_at_drain, 1);
    assert_eq!(stored_document(&store)[0]["message"], "before stop");

    reporter.log("after stop", None);
    sleep(Duration::from_secs(10)).await;

    assert_eq!(store.put_count(), puts_at_drain);
    assert_eq!(stored_document(&store).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_start_sampling_leaves_first_sampler_running() {
    let store = MemoryObjectStore::new();
    let executor = FixedMemory::new("100");
    let reporter = reporter(&store, executor.clone());

    reporter
        .start_sampling(SamplingConfig::memory(Duration::from_millis(10), "worker"))
        .unwrap();
    let second = reporter.start_sampling(SamplingConfig::disk_only(Duration::from_millis(1)));
    assert_eq!(second, Err(ReporterError::AlreadySampling));

    sleep(Duration::from_millis(55)).await;
    reporter.stop_sampling();

    let samples = reporter.entries();
    assert_eq!(samples.len(), 5);
    assert!(samples
        .iter()
        .all(|e| matches!(e.payload, LogPayload::MemorySample { kilobytes: 100, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_sampling_cannot_restart_after_stop() {
    let store = MemoryObjectStore::new();
    let reporter = reporter(&store, FixedMemory::new("1"));

    reporter
        .start_sampling(SamplingConfig::memory(Duration::from_millis(10), "worker"))
        .unwrap();
    sleep(Duration::from_millis(25)).await;
    reporter.stop_sampling();
    reporter.stop_sampling();

    assert_eq!(
        reporter.start_sampling(SamplingConfig::memory(Duration::from_millis(10), "worker")),
        Err(ReporterError::AlreadySampling)
    );
    sleep(Duration::from_millis(100)).await;
    assert_eq!(reporter.entries().len(), 2);
}
