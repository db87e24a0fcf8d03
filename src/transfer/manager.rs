//! Concurrent transfer batches
//!
//! The manager owns a bounded pool of single-transfer engines, retries
//! transient failures with backoff, aggregates byte-level progress across the
//! batch, and consults the transfer cache before touching the network. Each
//! request reaches exactly one terminal state; the batch drains fully unless
//! fail-fast mode or the caller's handle cancels it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{DownloadConfig, FailureMode};
use crate::error::{Error, Result};
use crate::events::{BatchTransferEvents, ErrorDetail, SingleTransferEvents};
use crate::retry::retry_with_backoff;
use crate::transfer::cache::{sha256_file, TransferCache};
use crate::transfer::engine::TransferEngine;
use crate::types::{BatchReport, DownloadRequest, TransferState, TransferStatus};

/// Cooperative cancellation handle for one batch.
///
/// Clone it before calling [`TransferManager::schedule`] to retain the
/// ability to cancel the batch while it runs.
#[derive(Clone, Debug, Default)]
pub struct BatchHandle {
    token: CancellationToken,
}

impl BatchHandle {
    /// Fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that is also cancelled whenever `parent` is cancelled, for
    /// batches running inside a larger cancellable operation.
    pub fn linked_to(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    /// Cancel the whole batch: in-flight transfers abort at the next chunk
    /// boundary, queued transfers never start.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Schedules batches of download requests with bounded concurrency.
pub struct TransferManager {
    config: DownloadConfig,
    engine: TransferEngine,
    cache: Option<Arc<TransferCache>>,
}

impl TransferManager {
    /// Manager with the given configuration and no cache.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let engine = TransferEngine::new(config.attempt_timeout)?;
        Ok(Self {
            config,
            engine,
            cache: None,
        })
    }

    /// Attach a transfer cache consulted before each request is dispatched.
    pub fn with_cache(mut self, cache: Arc<TransferCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run a batch of requests to completion.
    ///
    /// Every request reaches a terminal state before this returns. Per-task
    /// and aggregate progress flow through `events`; the returned
    /// [`BatchReport`] carries the final tallies, including failures, so a
    /// drained batch is `Ok` even when individual requests failed
    /// permanently.
    pub async fn schedule(
        &self,
        requests: Vec<DownloadRequest>,
        events: Arc<dyn BatchTransferEvents>,
        handle: &BatchHandle,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let total_requests = requests.len();
        tracing::info!(
            requests = total_requests,
            concurrency = self.config.concurrency,
            "scheduling transfer batch"
        );

        events.start();

        let batch = Arc::new(BatchState::new(events.clone(), &requests));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let token = handle.token();
        let fail_fast_fired = Arc::new(AtomicBool::new(false));

        let mut workers = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let worker = Worker {
                engine: self.engine.clone(),
                config: self.config.clone(),
                cache: self.cache.clone(),
                batch: batch.clone(),
                semaphore: semaphore.clone(),
                token: token.clone(),
                fail_fast_fired: fail_fast_fired.clone(),
            };
            workers.spawn(async move { worker.run(task_id(index, &request), request).await });
        }

        let mut succeeded = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(TaskOutcome::Succeeded) => succeeded += 1,
                Ok(TaskOutcome::Failed) => failed += 1,
                Ok(TaskOutcome::Cancelled) => cancelled += 1,
                Err(e) => {
                    tracing::error!(error = %e, "transfer worker panicked");
                    failed += 1;
                }
            }
        }

        let report = BatchReport {
            succeeded,
            failed,
            cancelled,
            bytes_downloaded: batch.total_downloaded(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            succeeded,
            failed,
            cancelled,
            bytes = report.bytes_downloaded,
            elapsed_ms = report.elapsed.as_millis(),
            "transfer batch drained"
        );

        if fail_fast_fired.load(Ordering::SeqCst) {
            // The triggering error was already reported, exactly once.
        } else if token.is_cancelled() {
            events.error(&Error::Cancelled("batch cancelled".to_string()));
        } else if failed > 0 {
            // Per-task failures were each reported through task_error; the
            // drained batch closes with one aggregate summary instead of
            // announcing completion.
            events.error(&Error::BatchFailed {
                failed,
                total: total_requests,
            });
        } else {
            events.finished();
        }

        Ok(report)
    }
}

fn task_id(index: usize, request: &DownloadRequest) -> String {
    format!("task_{index}_{}", request.file_name())
}

enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Shared progress table for one batch.
///
/// Workers mutate only their own entry; aggregates are recomputed from the
/// whole table on every update and published monotonically.
struct BatchState {
    events: Arc<dyn BatchTransferEvents>,
    states: Mutex<HashMap<String, TransferState>>,
    size_announced: AtomicBool,
    published_downloaded: AtomicU64,
}

impl BatchState {
    fn new(events: Arc<dyn BatchTransferEvents>, requests: &[DownloadRequest]) -> Self {
        let states = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let state = TransferState {
                    total: request.size,
                    ..TransferState::default()
                };
                (task_id(index, request), state)
            })
            .collect();
        Self {
            events,
            states: Mutex::new(states),
            size_announced: AtomicBool::new(false),
            published_downloaded: AtomicU64::new(0),
        }
    }

    fn update<F: FnOnce(&mut TransferState)>(&self, task: &str, apply: F) {
        let mut states = lock_or_recover(&self.states);
        if let Some(state) = states.get_mut(task) {
            apply(state);
        }
    }

    /// Recompute and emit the aggregate view. `downloaded_size` is guarded to
    /// be monotonically non-decreasing for the batch lifetime.
    fn publish(&self) {
        let (task_percents, downloaded, total, all_totals_known, speed) = {
            let states = lock_or_recover(&self.states);
            let task_percents: HashMap<String, u8> = states
                .iter()
                .map(|(id, state)| (id.clone(), state.percent().unwrap_or(0)))
                .collect();
            let downloaded: u64 = states.values().map(|s| s.downloaded).sum();
            let all_totals_known = states.values().all(|s| s.total.is_some());
            let total: u64 = states.values().filter_map(|s| s.total).sum();
            let speed: u64 = states
                .values()
                .filter(|s| s.status == TransferStatus::Active)
                .map(|s| s.speed)
                .sum();
            (task_percents, downloaded, total, all_totals_known, speed)
        };

        self.events.tasks_progress(&task_percents);

        if all_totals_known && !self.size_announced.swap(true, Ordering::SeqCst) {
            self.events.size(total);
        }

        let previous = self
            .published_downloaded
            .fetch_max(downloaded, Ordering::SeqCst);
        self.events.downloaded_size(downloaded.max(previous));

        self.events.speed(speed);

        if all_totals_known && total > 0 {
            let percent = ((downloaded.min(total) * 100) / total) as u8;
            self.events.progress(percent);
        }
    }

    fn total_downloaded(&self) -> u64 {
        let states = lock_or_recover(&self.states);
        states.values().map(|s| s.downloaded).sum()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Engine-level observer for one task: folds per-chunk events into the shared
/// table as a high-water mark and republishes the aggregate.
struct TaskObserver {
    task: String,
    batch: Arc<BatchState>,
}

impl SingleTransferEvents for TaskObserver {
    fn bytes_downloaded(&self, downloaded: u64, total: u64) {
        self.batch.update(&self.task, |state| {
            state.downloaded = state.downloaded.max(downloaded);
            if total > 0 {
                state.total = Some(total);
            }
        });
        self.batch.publish();
    }

    fn speed(&self, bytes_per_sec: u64) {
        self.batch.update(&self.task, |state| state.speed = bytes_per_sec);
        self.batch.publish();
    }

    fn error(&self, err: &Error) {
        let detail = ErrorDetail::of(err);
        self.batch.update(&self.task, |state| {
            state.speed = 0;
            state.last_error = Some(detail);
        });
    }
}

struct Worker {
    engine: TransferEngine,
    config: DownloadConfig,
    cache: Option<Arc<TransferCache>>,
    batch: Arc<BatchState>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    fail_fast_fired: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self, task: String, request: DownloadRequest) -> TaskOutcome {
        let Ok(_permit) = self.semaphore.acquire().await else {
            // The semaphore is never closed while workers are live.
            return self.settle_cancelled(&task, &request).await;
        };

        if self.token.is_cancelled() {
            return self.settle_cancelled(&task, &request).await;
        }

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.lookup(&request).await {
                tracing::info!(task, path = %entry.path.display(), "cache hit, skipping transfer");
                self.batch.update(&task, |state| {
                    state.status = TransferStatus::Succeeded;
                    state.downloaded = entry.size;
                    state.total = Some(entry.size);
                });
                self.batch.publish();
                self.batch.events.task_finished(&task);
                return TaskOutcome::Succeeded;
            }
        }

        self.batch.update(&task, |state| {
            state.status = TransferStatus::Active;
            state.attempt_count = 1;
        });
        self.batch.publish();

        let dest = request.resolved_path(&self.config.download_dir);
        let observer = TaskObserver {
            task: task.clone(),
            batch: self.batch.clone(),
        };

        let result = retry_with_backoff(
            &self.config.retry,
            || self.attempt(&request, &dest, &observer),
            |retry| {
                self.batch.update(&task, |state| {
                    state.status = TransferStatus::Active;
                    state.attempt_count = retry + 1;
                });
            },
        )
        .await;

        match result {
            Ok(bytes) => {
                self.batch.update(&task, |state| {
                    state.status = TransferStatus::Succeeded;
                    state.speed = 0;
                    state.downloaded = state.downloaded.max(bytes);
                    state.total = state.total.or(Some(bytes));
                });
                self.batch.publish();
                self.batch.events.task_finished(&task);
                TaskOutcome::Succeeded
            }
            Err(err) if err.is_cancelled() => {
                self.batch.update(&task, |state| {
                    state.status = TransferStatus::Cancelled;
                    state.speed = 0;
                    state.last_error = Some(ErrorDetail::of(&err));
                });
                self.batch.publish();
                self.batch.events.task_error(&task, &err);
                TaskOutcome::Cancelled
            }
            Err(err) => {
                tracing::error!(task, error = %err, "transfer failed permanently");
                self.batch.update(&task, |state| {
                    state.status = TransferStatus::Failed;
                    state.speed = 0;
                    state.last_error = Some(ErrorDetail::of(&err));
                });
                self.batch.publish();
                self.batch.events.task_error(&task, &err);

                if self.config.failure_mode == FailureMode::FailFast
                    && !self.fail_fast_fired.swap(true, Ordering::SeqCst)
                {
                    tracing::warn!(task, "fail-fast triggered, cancelling batch");
                    self.batch.events.error(&err);
                    self.token.cancel();
                }
                TaskOutcome::Failed
            }
        }
    }

    /// One full attempt: transfer, then checksum verification when declared,
    /// then cache publication. A mismatched checksum removes the file and
    /// fails the attempt as retryable.
    async fn attempt(
        &self,
        request: &DownloadRequest,
        dest: &std::path::Path,
        observer: &TaskObserver,
    ) -> Result<u64> {
        url::Url::parse(&request.url)
            .map_err(|e| Error::InvalidRequest(format!("{}: {e}", request.url)))?;

        let bytes = self
            .engine
            .transfer(request, dest, observer, &self.token)
            .await?;

        if let Some(expected) = &request.checksum {
            let actual = sha256_file(dest).await?;
            if actual != *expected {
                if let Err(e) = tokio::fs::remove_file(dest).await {
                    tracing::warn!(dest = %dest.display(), error = %e, "failed to remove corrupt file");
                }
                return Err(Error::ChecksumMismatch {
                    path: dest.to_path_buf(),
                    expected: expected.clone(),
                    actual,
                });
            }
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.record(request, dest, bytes).await {
                    tracing::warn!(error = %e, "failed to record cache entry");
                }
            }
        }

        Ok(bytes)
    }

    async fn settle_cancelled(&self, task: &str, request: &DownloadRequest) -> TaskOutcome {
        let err = Error::Cancelled(request.url.clone());
        self.batch.update(task, |state| {
            state.status = TransferStatus::Cancelled;
            state.last_error = Some(ErrorDetail::of(&err));
        });
        self.batch.publish();
        self.batch.events.task_error(task, &err);
        TaskOutcome::Cancelled
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, RetryConfig};
    use crate::events::{Callbacks, Payload};
    use sha2::{Digest, Sha256};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn test_config(download_dir: &std::path::Path) -> DownloadConfig {
        DownloadConfig {
            concurrency: 2,
            attempt_timeout: Duration::from_secs(5),
            retry: fast_retry(),
            failure_mode: FailureMode::ContinueOnError,
            download_dir: download_dir.to_path_buf(),
        }
    }

    fn recording_events() -> (Arc<Callbacks>, Arc<Mutex<Vec<(String, Payload)>>>) {
        let log: Arc<Mutex<Vec<(String, Payload)>>> = Arc::new(Mutex::new(Vec::new()));
        let mut callbacks = Callbacks::new();
        for slot in [
            "start",
            "tasks_progress",
            "size",
            "downloaded_size",
            "speed",
            "progress",
            "bytes_downloaded",
            "finished",
            "error",
        ] {
            let log = log.clone();
            callbacks = callbacks.on(slot, move |payload| {
                log.lock().unwrap().push((slot.to_string(), payload.clone()));
            });
        }
        (Arc::new(callbacks), log)
    }

    async fn mount_file(server: &MockServer, route: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn batch_of_three_succeeds_with_bounded_concurrency() {
        let server = MockServer::start().await;
        for name in ["a.bin", "b.bin", "c.bin"] {
            mount_file(&server, &format!("/{name}"), vec![1u8; 1000]).await;
        }

        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(test_config(dir.path())).unwrap();
        let requests = ["a.bin", "b.bin", "c.bin"]
            .iter()
            .map(|name| DownloadRequest::new(format!("{}/{name}", server.uri())))
            .collect();
        let (events, log) = recording_events();

        let report = manager
            .schedule(requests, events, &BatchHandle::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.bytes_downloaded, 3000);
        for name in ["a.bin", "b.bin", "c.bin"] {
            assert!(dir.path().join(name).exists());
        }

        let log = log.lock().unwrap();
        let batch_finished = log
            .iter()
            .filter(|(n, p)| n == "finished" && matches!(p, Payload::None))
            .count();
        let task_finished = log
            .iter()
            .filter(|(n, p)| n == "finished" && matches!(p, Payload::Task(_)))
            .count();
        assert_eq!(batch_finished, 1);
        assert_eq!(task_finished, 3);
        assert!(!log.iter().any(|(n, _)| n == "error"));
    }

    #[tokio::test]
    async fn downloaded_size_is_monotonic() {
        let server = MockServer::start().await;
        mount_file(&server, "/x.bin", vec![2u8; 700_000]).await;
        mount_file(&server, "/y.bin", vec![3u8; 700_000]).await;

        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(test_config(dir.path())).unwrap();
        let requests = vec![
            DownloadRequest::new(format!("{}/x.bin", server.uri())),
            DownloadRequest::new(format!("{}/y.bin", server.uri())),
        ];
        let (events, log) = recording_events();

        manager
            .schedule(requests, events, &BatchHandle::new())
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let sizes: Vec<u64> = log
            .iter()
            .filter_map(|(n, p)| match (n.as_str(), p) {
                ("downloaded_size", Payload::Size(bytes)) => Some(*bytes),
                _ => None,
            })
            .collect();
        assert!(!sizes.is_empty());
        assert!(
            sizes.windows(2).all(|w| w[0] <= w[1]),
            "downloaded_size regressed: {sizes:?}"
        );
        assert_eq!(*sizes.last().unwrap(), 1_400_000);
    }

    #[tokio::test]
    async fn not_found_consumes_no_retries_and_batch_closes_with_a_summary() {
        let server = MockServer::start().await;
        mount_file(&server, "/good.bin", vec![1u8; 100]).await;
        Mock::given(method("GET"))
            .and(path("/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1) // non-retryable: exactly one network attempt
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(test_config(dir.path())).unwrap();
        let requests = vec![
            DownloadRequest::new(format!("{}/good.bin", server.uri())),
            DownloadRequest::new(format!("{}/missing.bin", server.uri())),
        ];
        let (events, log) = recording_events();

        let report = manager
            .schedule(requests, events, &BatchHandle::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        let log = log.lock().unwrap();
        let task_errors: Vec<_> = log
            .iter()
            .filter_map(|(n, p)| match (n.as_str(), p) {
                ("error", Payload::TaskFailure { task, error }) => Some((task.clone(), error.kind)),
                _ => None,
            })
            .collect();
        assert_eq!(task_errors.len(), 1);
        assert_eq!(task_errors[0].1, "not_found");
        // The surviving sibling still reports its own completion
        assert!(log
            .iter()
            .any(|(n, p)| n == "finished" && matches!(p, Payload::Task(_))));
        // The batch closes with one aggregate summary, not with finished
        let summaries = log
            .iter()
            .filter(|(n, p)| {
                *n == "error" && matches!(p, Payload::Failure(d) if d.kind == "batch_failed")
            })
            .count();
        assert_eq!(summaries, 1);
        assert!(!log
            .iter()
            .any(|(n, p)| n == "finished" && matches!(p, Payload::None)));
    }

    #[tokio::test]
    async fn cache_hit_skips_network_and_still_reports_finished() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 64]))
            .expect(0) // a cache hit must not touch the network
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let contents = vec![5u8; 64];
        let local = dir.path().join("cached.bin");
        tokio::fs::write(&local, &contents).await.unwrap();
        let checksum = format!("{:x}", Sha256::digest(&contents));

        let cache = Arc::new(
            TransferCache::load(CacheConfig::at(dir.path().join("index.json"))).await,
        );
        let request = DownloadRequest::new(format!("{}/cached.bin", server.uri()))
            .with_checksum(checksum)
            .with_path(&local);
        cache.record(&request, &local, 64).await.unwrap();

        let manager = TransferManager::new(test_config(dir.path()))
            .unwrap()
            .with_cache(cache);
        let (events, log) = recording_events();

        let report = manager
            .schedule(vec![request], events, &BatchHandle::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        let log = log.lock().unwrap();
        assert!(log
            .iter()
            .any(|(n, p)| n == "finished" && matches!(p, Payload::Task(_))));
    }

    #[tokio::test]
    async fn checksum_mismatch_retries_then_fails_and_removes_file() {
        let server = MockServer::start().await;
        mount_file(&server, "/bad.bin", b"unexpected content".to_vec()).await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.retry.max_attempts = 1;
        let manager = TransferManager::new(config).unwrap();
        let request = DownloadRequest::new(format!("{}/bad.bin", server.uri()))
            .with_checksum("0".repeat(64));
        let (events, log) = recording_events();

        let report = manager
            .schedule(vec![request], events, &BatchHandle::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(!dir.path().join("bad.bin").exists());

        let log = log.lock().unwrap();
        let kinds: Vec<&str> = log
            .iter()
            .filter_map(|(n, p)| match (n.as_str(), p) {
                ("error", Payload::TaskFailure { error, .. }) => Some(error.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["checksum_mismatch"]);
    }

    #[tokio::test]
    async fn fail_fast_cancels_remaining_work_and_reports_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/poison.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 100])
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.failure_mode = FailureMode::FailFast;
        let manager = TransferManager::new(config).unwrap();
        let requests = vec![
            DownloadRequest::new(format!("{}/poison.bin", server.uri())),
            DownloadRequest::new(format!("{}/slow.bin", server.uri())),
        ];
        let (events, log) = recording_events();

        let report = manager
            .schedule(requests, events, &BatchHandle::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.succeeded, 0);

        let log = log.lock().unwrap();
        let batch_errors = log
            .iter()
            .filter(|(n, p)| n == "error" && matches!(p, Payload::Failure(_)))
            .count();
        assert_eq!(batch_errors, 1, "triggering error reported exactly once");
        assert!(
            !log.iter()
                .any(|(n, p)| n == "finished" && matches!(p, Payload::None)),
            "a failed fail-fast batch must not announce completion"
        );
    }

    #[tokio::test]
    async fn cancelling_the_handle_cancels_queued_and_in_flight_transfers() {
        let server = MockServer::start().await;
        for name in ["one.bin", "two.bin", "three.bin"] {
            Mock::given(method("GET"))
                .and(path(format!("/{name}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(vec![8u8; 4096])
                        .set_delay(Duration::from_secs(2)),
                )
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(test_config(dir.path())).unwrap();
        let requests = ["one.bin", "two.bin", "three.bin"]
            .iter()
            .map(|name| DownloadRequest::new(format!("{}/{name}", server.uri())))
            .collect();
        let (events, _log) = recording_events();

        let handle = BatchHandle::new();
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let report = manager.schedule(requests, events, &handle).await.unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.cancelled, 3);
        // No partially written destination files survive
        for name in ["one.bin", "two.bin", "three.bin"] {
            assert!(!dir.path().join(name).exists());
        }
    }

    #[tokio::test]
    async fn malformed_url_fails_without_consuming_retries() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(test_config(dir.path())).unwrap();
        let request = DownloadRequest::new("not a url at all");
        let (events, log) = recording_events();

        let report = manager
            .schedule(vec![request], events, &BatchHandle::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        let log = log.lock().unwrap();
        let kinds: Vec<&str> = log
            .iter()
            .filter_map(|(n, p)| match (n.as_str(), p) {
                ("error", Payload::TaskFailure { error, .. }) => Some(error.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["invalid_request"]);
    }

    #[tokio::test]
    async fn size_is_announced_once_when_all_totals_are_known() {
        let server = MockServer::start().await;
        mount_file(&server, "/m.bin", vec![1u8; 500]).await;
        mount_file(&server, "/n.bin", vec![1u8; 700]).await;

        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(test_config(dir.path())).unwrap();
        let requests = vec![
            DownloadRequest::new(format!("{}/m.bin", server.uri())).with_size(500),
            DownloadRequest::new(format!("{}/n.bin", server.uri())).with_size(700),
        ];
        let (events, log) = recording_events();

        manager
            .schedule(requests, events, &BatchHandle::new())
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let sizes: Vec<u64> = log
            .iter()
            .filter_map(|(n, p)| match (n.as_str(), p) {
                ("size", Payload::Size(bytes)) => Some(*bytes),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![1200]);
    }
}
