//! Integration tests for the coordination protocol
//!
//! These tests run the controller and worker sides end to end against a real
//! temporary directory, including concurrent waits and republishes.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::time::Instant;

use syncpoint::{ControllerCoordination, CoordinationConfig, StateEnvelope, WorkerCoordination};

fn fast_config() -> CoordinationConfig {
    CoordinationConfig {
        enabled: true,
        check_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        ..Default::default()
    }
}

fn payload() -> Map<String, Value> {
    let Value::Object(map) = json!({
        "environment_id": 17,
        "database_path": "/tmp/proj/.data/state.db",
        "expected_workers": 3,
        "precreated_entries": {
            "test_files": ["tests/test_a.py", "tests/test_b.py"],
        },
    }) else {
        unreachable!()
    };
    map
}

// =============================================================================
// Full handshake
// =============================================================================

#[tokio::test]
async fn test_publish_then_worker_wait_returns_payload_and_marks_ack() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();

    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();
    controller.publish_state(payload()).await.unwrap();

    let mut worker = WorkerCoordination::new("gw0", temp.path(), config.clone())
        .await
        .unwrap();
    let envelope = worker.wait_for_envelope(None).await.unwrap();

    assert_eq!(envelope.payload(), &payload());
    assert_eq!(envelope.environment_id(), Some(17));

    // Exactly one marker, for this worker's id
    let ready = controller.ready_workers();
    assert_eq!(ready.len(), 1);
    assert!(ready.contains("gw0"));
}

#[tokio::test]
async fn test_workers_block_until_publish_happens() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();

    // Workers start first and block
    let mut handles = Vec::new();
    for id in ["gw0", "gw1", "gw2"] {
        let config = config.clone();
        let root = temp.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            let mut worker = WorkerCoordination::new(id, &root, config).await.unwrap();
            worker.wait_for_envelope(Some(Duration::from_secs(5))).await?;
            Ok::<_, syncpoint::CoordinationError>(worker.environment_id())
        }));
    }

    // Publish after a delay
    tokio::time::sleep(Duration::from_millis(60)).await;
    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();
    controller.publish_state(payload()).await.unwrap();

    for handle in handles {
        let env_id = handle.await.unwrap().unwrap();
        assert_eq!(env_id, Some(17));
    }

    let ok = controller.wait_for_quorum(3, Duration::from_secs(5)).await;
    assert!(ok);
    assert_eq!(controller.ready_workers().len(), 3);
}

// =============================================================================
// Quorum
// =============================================================================

#[tokio::test]
async fn test_quorum_met_regardless_of_ack_order() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();

    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();
    controller.publish_state(payload()).await.unwrap();

    // Acknowledge in reverse order with gaps, while the controller waits
    let quorum = controller.wait_for_quorum(3, Duration::from_secs(5));

    let acks = async {
        for id in ["gw2", "gw0", "gw1"] {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut worker = WorkerCoordination::new(id, temp.path(), config.clone())
                .await
                .unwrap();
            worker.wait_for_envelope(None).await.unwrap();
        }
    };

    let (ok, ()) = tokio::join!(quorum, acks);
    assert!(ok);
}

#[tokio::test]
async fn test_quorum_not_met_returns_false_not_error() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();

    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();
    controller.publish_state(payload()).await.unwrap();

    // Only two of three workers show up
    for id in ["gw0", "gw1"] {
        let mut worker = WorkerCoordination::new(id, temp.path(), config.clone())
            .await
            .unwrap();
        worker.wait_for_envelope(None).await.unwrap();
    }

    let ok = controller.wait_for_quorum(3, Duration::from_millis(200)).await;
    assert!(!ok);
    assert_eq!(controller.ready_workers().len(), 2);
}

#[tokio::test]
async fn test_prepare_for_workers_skips_quorum_without_a_count() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();

    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();

    // Unknown worker count: publish succeeds and nothing polls
    let started = Instant::now();
    let envelope = controller.prepare_for_workers(payload(), None).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1), "must not poll without a count");
    assert_eq!(envelope.expected_workers(), Some(3));

    // A count of zero likewise returns without polling
    let started = Instant::now();
    controller.prepare_for_workers(payload(), Some(0)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_worker_timeout_is_approximately_configured() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();
    let timeout = Duration::from_millis(300);

    let mut worker = WorkerCoordination::new("gw0", temp.path(), config.clone())
        .await
        .unwrap();

    let started = Instant::now();
    let err = worker.wait_for_envelope(Some(timeout)).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= timeout);
    // Within one (capped) poll interval of slack
    assert!(
        elapsed < timeout + config.max_interval + Duration::from_millis(100),
        "took {elapsed:?} for a {timeout:?} timeout"
    );
    assert!(!config.worker_ack_path(temp.path(), "gw0").exists());
}

// =============================================================================
// Atomicity under republish
// =============================================================================

#[tokio::test]
async fn test_concurrent_republish_never_yields_torn_reads() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();
    let marker = config.ready_marker_path(temp.path());

    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();
    controller.publish_state(payload()).await.unwrap();

    // Writer: republish a growing payload as fast as possible
    let writer = tokio::spawn(async move {
        for i in 0..200u64 {
            let Value::Object(map) = json!({
                "environment_id": i,
                "filler": "x".repeat(4096),
            }) else {
                unreachable!()
            };
            controller.publish_state(map).await.unwrap();
        }
    });

    // Reader: every observed file must parse as a complete envelope
    let reader = tokio::spawn(async move {
        let mut seen = 0u32;
        while seen < 400 {
            let bytes = tokio::fs::read(&marker).await.unwrap();
            let envelope = StateEnvelope::parse(&bytes).expect("torn or corrupt envelope observed");
            assert!(envelope.environment_id().is_some());
            seen += 1;
        }
    });

    let (w, r) = tokio::join!(writer, reader);
    w.unwrap();
    r.unwrap();
}

// =============================================================================
// Cleanup and reset
// =============================================================================

#[tokio::test]
async fn test_cleanup_and_reset_between_runs() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = fast_config();

    let mut controller = ControllerCoordination::new(temp.path(), config.clone())
        .await
        .unwrap();
    controller.publish_state(payload()).await.unwrap();

    let mut worker = WorkerCoordination::new("gw0", temp.path(), config.clone())
        .await
        .unwrap();
    worker.wait_for_envelope(None).await.unwrap();
    assert_eq!(controller.ready_workers().len(), 1);

    // Reset acks but keep the envelope: next round starts from zero workers
    controller.reset_acknowledgments().await;
    assert_eq!(controller.ready_workers().len(), 0);
    assert!(config.ready_marker_path(temp.path()).exists());

    // Full cleanup removes the directory; repeating it is a no-op
    controller.cleanup().await;
    assert!(!config.coordination_dir(temp.path()).exists());
    controller.cleanup().await;
}
