//! Tests for metrics emitted by the broker.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use bragi::{BragiError, BrokerConfig, SpeechBroker, telemetry};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Whether a histogram `name` was recorded with `label` = `value`.
fn has_histogram_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> bool {
    snapshot.iter().any(|(key, _, _, _)| {
        key.kind() == MetricKind::Histogram
            && key.key().name() == name
            && key
                .key()
                .labels()
                .any(|l| l.key() == label && l.value() == value)
    })
}

/// Run `test` on a current-thread runtime with a local recorder installed.
///
/// Generation happens in spawned tasks; a single-threaded runtime keeps
/// them on the thread that owns the recorder.
fn recorded<F, Fut, T>(test: F) -> (T, SnapshotVec)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let output = metrics::with_local_recorder(&recorder, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(test())
    });
    (output, snapshotter.snapshot().into_vec())
}

fn config_for(server: &MockServer) -> BrokerConfig {
    BrokerConfig::new()
        .api_url(server.uri())
        .max_retries(2)
        .retry_base_delay(Duration::from_millis(1))
        .probe_interval(Duration::from_millis(20))
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn cache_reuse_records_metrics() {
    let (result, snapshot) = recorded(|| async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 0]))
            .mount(&server)
            .await;

        let broker = SpeechBroker::new(config_for(&server))?;
        broker.synthesize("v1", "s1", "hi.").await?;
        broker.synthesize("v1", "s1", "hi.").await
    });
    assert!(result.is_ok());

    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 2);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_REUSED_TOTAL), 1);
    assert!(
        has_histogram_with_label(
            &snapshot,
            telemetry::GENERATION_DURATION_SECONDS,
            "status",
            "ok"
        ),
        "expected a successful generation duration entry"
    );
}

#[test]
fn joined_requests_counted_as_deduplicated() {
    let (results, snapshot) = recorded(|| async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8, 0])
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let broker = SpeechBroker::new(config_for(&server)).unwrap();
        join_all((0..3).map(|_| {
            let broker = Arc::clone(&broker);
            async move { broker.synthesize("v1", "s1", "same.").await }
        }))
        .await
    });
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 3);
    assert_eq!(counter_total(&snapshot, telemetry::DEDUPLICATED_TOTAL), 2);
}

#[test]
fn rejected_requests_counted_as_overloaded() {
    let (result, snapshot) = recorded(|| async {
        let server = MockServer::start().await;
        let broker = SpeechBroker::new(config_for(&server).max_queued(0)).unwrap();
        broker.synthesize("v1", "s1", "hi.").await
    });
    assert_eq!(result, Err(BragiError::Overloaded));

    assert_eq!(counter_total(&snapshot, telemetry::OVERLOADED_TOTAL), 1);
}

#[test]
fn retries_and_failed_generation_recorded() {
    let (result, snapshot) = recorded(|| async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let broker = SpeechBroker::new(config_for(&server)).unwrap();
        let result = broker.synthesize("v1", "s1", "hi.").await;
        broker.shutdown();
        result
    });
    assert_eq!(result, Err(BragiError::Unreachable { attempts: 3 }));

    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 2);
    assert!(has_histogram_with_label(
        &snapshot,
        telemetry::GENERATION_DURATION_SECONDS,
        "status",
        "error"
    ));
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 0]))
        .mount(&server)
        .await;
    let broker = SpeechBroker::new(config_for(&server)).unwrap();
    broker.synthesize("v1", "s1", "hi.").await.unwrap();
}
