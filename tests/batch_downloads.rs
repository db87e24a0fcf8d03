//! End-to-end download batch scenarios against a mock HTTP server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use launcher_dl::{
    BatchHandle, CacheConfig, Callbacks, DownloadConfig, DownloadRequest, FailureMode, Payload,
    RetryConfig, TransferCache, TransferManager,
};
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

type EventLog = Arc<Mutex<Vec<(String, Payload)>>>;

fn recording_events() -> (Arc<Callbacks>, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = Callbacks::new();
    for slot in [
        "start",
        "tasks_progress",
        "size",
        "downloaded_size",
        "speed",
        "progress",
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

fn test_config(download_dir: &std::path::Path) -> DownloadConfig {
    DownloadConfig {
        concurrency: 2,
        attempt_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        failure_mode: FailureMode::ContinueOnError,
        download_dir: download_dir.to_path_buf(),
    }
}

async fn mount_file(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Scenario: a small batch with bounded concurrency where everything
/// succeeds. The batch lifecycle is one start, monotonic progress to 100,
/// one batch-level finished, zero errors.
#[tokio::test]
async fn all_successful_batch_has_clean_lifecycle() {
    let server = MockServer::start().await;
    for name in ["client.jar", "assets.zip", "natives.so"] {
        mount_file(&server, &format!("/{name}"), vec![7u8; 2048]).await;
    }

    let dir = tempfile::tempdir().unwrap();
    let manager = TransferManager::new(test_config(dir.path())).unwrap();
    let requests: Vec<_> = ["client.jar", "assets.zip", "natives.so"]
        .iter()
        .map(|name| DownloadRequest::new(format!("{}/{name}", server.uri())).with_size(2048))
        .collect();
    let (events, log) = recording_events();

    let report = manager
        .schedule(requests, events, &BatchHandle::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.cancelled, 0);

    let log = log.lock().unwrap();
    let starts = log.iter().filter(|(n, _)| n == "start").count();
    assert_eq!(starts, 1);

    let percents: Vec<u8> = log
        .iter()
        .filter_map(|(n, p)| match (n.as_str(), p) {
            ("progress", Payload::Percent(v)) => Some(*v),
            _ => None,
        })
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100);

    let batch_finished = log
        .iter()
        .filter(|(n, p)| n == "finished" && matches!(p, Payload::None))
        .count();
    assert_eq!(batch_finished, 1);
    assert!(!log.iter().any(|(n, _)| n == "error"));
}

/// Scenario: one request 404s. No retries are spent on it, its failure is
/// reported once with a stable kind, the surviving request still completes,
/// and the batch closes with one aggregate error summary instead of finished.
#[tokio::test]
async fn not_found_fails_once_without_aborting_siblings() {
    let server = MockServer::start().await;
    mount_file(&server, "/ok.jar", vec![1u8; 256]).await;
    Mock::given(method("GET"))
        .and(path("/missing.jar"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TransferManager::new(test_config(dir.path())).unwrap();
    let requests = vec![
        DownloadRequest::new(format!("{}/ok.jar", server.uri())),
        DownloadRequest::new(format!("{}/missing.jar", server.uri())),
    ];
    let (events, log) = recording_events();

    let report = manager
        .schedule(requests, events, &BatchHandle::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(dir.path().join("ok.jar").exists());
    assert!(!dir.path().join("missing.jar").exists());

    let log = log.lock().unwrap();
    let task_errors: Vec<&'static str> = log
        .iter()
        .filter_map(|(n, p)| match (n.as_str(), p) {
            ("error", Payload::TaskFailure { error, .. }) => Some(error.kind),
            _ => None,
        })
        .collect();
    assert_eq!(task_errors, vec!["not_found"]);
    // The surviving request still announces its own completion
    assert!(log
        .iter()
        .any(|(n, p)| n == "finished" && matches!(p, Payload::Task(id) if id.ends_with("ok.jar"))));
    // One batch-level summary, no batch-level finished
    let summaries: Vec<&'static str> = log
        .iter()
        .filter_map(|(n, p)| match (n.as_str(), p) {
            ("error", Payload::Failure(detail)) => Some(detail.kind),
            _ => None,
        })
        .collect();
    assert_eq!(summaries, vec!["batch_failed"]);
    assert!(!log
        .iter()
        .any(|(n, p)| n == "finished" && matches!(p, Payload::None)));
}

/// Responder that fails with a server error a fixed number of times, then
/// serves the body.
struct FlakyResponder {
    failures_left: Mutex<u32>,
    body: Vec<u8>,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}

/// Scenario: a request fails transiently twice and succeeds on the third
/// attempt. The retry budget allows it, the backoff delays are observable in
/// the elapsed time, and the file lands intact.
#[tokio::test]
async fn transient_failures_recover_within_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(FlakyResponder {
            failures_left: Mutex::new(2),
            body: vec![9u8; 512],
        })
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TransferManager::new(test_config(dir.path())).unwrap();
    let request = DownloadRequest::new(format!("{}/flaky.bin", server.uri()));
    let (events, log) = recording_events();

    let started = Instant::now();
    let report = manager
        .schedule(vec![request], events, &BatchHandle::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    // Two backoff delays: 50ms then 100ms
    assert!(
        elapsed >= Duration::from_millis(140),
        "expected two backoff delays, finished in {elapsed:?}"
    );
    assert_eq!(tokio::fs::read(dir.path().join("flaky.bin")).await.unwrap().len(), 512);

    let log = log.lock().unwrap();
    assert!(log
        .iter()
        .any(|(n, p)| n == "finished" && matches!(p, Payload::Task(_))));
}

/// Scenario: the retry budget runs out. Attempts stay within the R+1 bound
/// and the request fails permanently.
#[tokio::test]
async fn attempts_never_exceed_the_retry_bound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/always500.bin"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4) // maxRetries=3 means at most 4 network attempts
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = TransferManager::new(test_config(dir.path())).unwrap();
    let request = DownloadRequest::new(format!("{}/always500.bin", server.uri()));
    let (events, _log) = recording_events();

    let report = manager
        .schedule(vec![request], events, &BatchHandle::new())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
}

/// Scenario: the notification group registers no `speed` handler. Speed
/// events are silently absorbed and everything else is still delivered.
#[tokio::test]
async fn missing_speed_handler_is_silently_absorbed() {
    let server = MockServer::start().await;
    mount_file(&server, "/quiet.bin", vec![4u8; 1024]).await;

    let finished: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let finished_clone = finished.clone();
    let callbacks = Callbacks::new().verbose(true).on("finished", move |_| {
        *finished_clone.lock().unwrap() += 1;
    });

    let dir = tempfile::tempdir().unwrap();
    let manager = TransferManager::new(test_config(dir.path())).unwrap();
    let request = DownloadRequest::new(format!("{}/quiet.bin", server.uri()));

    let report = manager
        .schedule(vec![request], Arc::new(callbacks), &BatchHandle::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    // task finished + batch finished both landed in the registered slot
    assert_eq!(*finished.lock().unwrap(), 2);
}

/// Scenario: a request whose checksum matches a cache entry never touches
/// the network and still reports finished.
#[tokio::test]
async fn cache_hit_completes_without_network_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached.jar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8; 128]))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let contents = vec![2u8; 128];
    let local = dir.path().join("cached.jar");
    tokio::fs::write(&local, &contents).await.unwrap();
    let checksum = format!("{:x}", Sha256::digest(&contents));

    let cache = Arc::new(TransferCache::load(CacheConfig::at(dir.path().join("index.json"))).await);
    let request = DownloadRequest::new(format!("{}/cached.jar", server.uri()))
        .with_path(&local)
        .with_checksum(checksum);
    cache.record(&request, &local, 128).await.unwrap();

    let manager = TransferManager::new(test_config(dir.path()))
        .unwrap()
        .with_cache(cache.clone());
    let (events, log) = recording_events();

    let report = manager
        .schedule(vec![request], events, &BatchHandle::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(cache.stats().await.entries, 1);
    let log = log.lock().unwrap();
    assert!(log
        .iter()
        .any(|(n, p)| n == "finished" && matches!(p, Payload::Task(_))));
}

/// Scenario: the caller cancels a batch mid-flight. Every unfinished
/// transfer settles Cancelled and no partially written file survives.
#[tokio::test]
async fn mid_flight_cancellation_leaves_no_partial_files() {
    let server = MockServer::start().await;
    for name in ["a.bin", "b.bin", "c.bin", "d.bin"] {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![6u8; 8192])
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let manager = TransferManager::new(test_config(dir.path())).unwrap();
    let requests: Vec<_> = ["a.bin", "b.bin", "c.bin", "d.bin"]
        .iter()
        .map(|name| DownloadRequest::new(format!("{}/{name}", server.uri())))
        .collect();
    let (events, _log) = recording_events();

    let handle = BatchHandle::new();
    let canceller = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let report = manager.schedule(requests, events, &handle).await.unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.cancelled, 4);
    for name in ["a.bin", "b.bin", "c.bin", "d.bin"] {
        assert!(
            !dir.path().join(name).exists(),
            "{name} left a partial file behind"
        );
    }
}

/// Scenario: fail-fast mode. The first permanent failure cancels the rest of
/// the batch and the triggering error is reported exactly once.
#[tokio::test]
async fn fail_fast_aborts_the_remainder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/denied.jar"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow.jar"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![1u8; 512])
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.failure_mode = FailureMode::FailFast;
    let manager = TransferManager::new(config).unwrap();
    let requests = vec![
        DownloadRequest::new(format!("{}/denied.jar", server.uri())),
        DownloadRequest::new(format!("{}/slow.jar", server.uri())),
    ];
    let (events, log) = recording_events();

    let report = manager
        .schedule(requests, events, &BatchHandle::new())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 1);

    let log = log.lock().unwrap();
    let batch_errors: Vec<&'static str> = log
        .iter()
        .filter_map(|(n, p)| match (n.as_str(), p) {
            ("error", Payload::Failure(detail)) => Some(detail.kind),
            _ => None,
        })
        .collect();
    assert_eq!(batch_errors, vec!["permission_denied"]);
    assert!(!log
        .iter()
        .any(|(n, p)| n == "finished" && matches!(p, Payload::None)));
}
