//! Chunked download engine: size, coverage, cleanup, cancellation and rate limits

mod support;

use ferry::core::{ChunkedTransferEngine, StatusPublisher};
use ferry::error::TransferError;
use ferry::remote::{MediaKind, RemoteError, RemoteMetadata};
use ferry_core_resilience::{CancelReason, CancellationRegistry, TaskHandle, TaskState};
use std::sync::Arc;
use std::time::Duration;
use support::{config_in, leftovers, payload, Op, ScriptedRemote};
use tempfile::tempdir;

#[tokio::test]
async fn test_ten_megabyte_object_in_three_chunks() {
    let dir = tempdir().unwrap();
    let data = payload(10_000_000, 3);
    let remote = ScriptedRemote::new()
        .with_object("chat/video", data.clone(), "vid")
        .shared();
    let engine = ChunkedTransferEngine::new(remote.clone(), &config_in(dir.path()));

    let meta = remote.metadata_of("chat/video");
    let mut task = engine
        .new_task(meta, "out".into(), TaskHandle::detached("t"))
        .unwrap();
    let artifact = engine.transfer(&mut task).await.unwrap();

    assert_eq!(artifact.size(), 10_000_000);
    assert_eq!(std::fs::metadata(artifact.path()).unwrap().len(), 10_000_000);
    assert_eq!(std::fs::read(artifact.path()).unwrap(), data);
    assert_eq!(task.state(), TaskState::Assembling);

    let mut lengths: Vec<(String, u64)> = remote
        .calls_to(Op::FetchRange)
        .into_iter()
        .map(|c| (c.key, c.length))
        .collect();
    lengths.sort();
    assert_eq!(
        lengths,
        vec![
            ("chat/video@0".to_string(), 4_194_304),
            ("chat/video@4194304".to_string(), 4_194_304),
            ("chat/video@8388608".to_string(), 1_611_392),
        ]
    );

    let path = artifact.path_buf();
    drop(artifact);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_out_of_order_chunks_assemble_exactly() {
    let dir = tempdir().unwrap();
    let data = payload(100, 9);
    // Earlier chunks finish last
    let remote = ScriptedRemote::new()
        .with_object("o", data.clone(), "id")
        .delay(Op::FetchRange, Some("o@0"), Duration::from_millis(60))
        .delay(Op::FetchRange, Some("o@16"), Duration::from_millis(30))
        .shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        max_concurrent_chunks: 3,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), TaskHandle::detached("t"))
        .unwrap();
    let artifact = engine.transfer(&mut task).await.unwrap();

    assert_eq!(remote.calls_to(Op::FetchRange).len(), 7);
    assert_eq!(std::fs::read(artifact.path()).unwrap(), data);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_fetches_stay_within_ceiling() {
    let dir = tempdir().unwrap();
    let data = payload(640, 2);
    let remote = ScriptedRemote::new()
        .with_object("o", data.clone(), "id")
        .delay(Op::FetchRange, None, Duration::from_millis(20))
        .shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        max_concurrent_chunks: 3,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), TaskHandle::detached("t"))
        .unwrap();
    let artifact = engine.transfer(&mut task).await.unwrap();

    assert_eq!(remote.calls_to(Op::FetchRange).len(), 40);
    assert_eq!(remote.peak_in_flight(Op::FetchRange), 3);
    assert_eq!(std::fs::read(artifact.path()).unwrap(), data);
}

#[tokio::test]
async fn test_source_without_ranges_fetched_whole() {
    let dir = tempdir().unwrap();
    let data = payload(9_000, 1);
    let meta = RemoteMetadata::media("stream", MediaKind::Audio, 9_000, "s").with_ranged(false);
    let remote = ScriptedRemote::new().with_metadata(meta.clone(), data.clone()).shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 1_000,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let mut task = engine
        .new_task(meta, "out".into(), TaskHandle::detached("t"))
        .unwrap();
    let artifact = engine.transfer(&mut task).await.unwrap();

    assert_eq!(remote.calls_to(Op::FetchRange).len(), 0);
    assert_eq!(remote.calls_to(Op::FetchWhole).len(), 1);
    assert_eq!(std::fs::read(artifact.path()).unwrap(), data);
}

#[tokio::test]
async fn test_empty_object_needs_no_fetch() {
    let dir = tempdir().unwrap();
    let remote = ScriptedRemote::new().with_object("empty", Vec::new(), "e").shared();
    let engine = ChunkedTransferEngine::new(remote.clone(), &config_in(dir.path()));

    let mut task = engine
        .new_task(remote.metadata_of("empty"), "out".into(), TaskHandle::detached("t"))
        .unwrap();
    let artifact = engine.transfer(&mut task).await.unwrap();

    assert_eq!(artifact.size(), 0);
    assert_eq!(std::fs::metadata(artifact.path()).unwrap().len(), 0);
    assert!(remote.calls_to(Op::FetchRange).is_empty());
}

#[tokio::test]
async fn test_failed_chunk_fails_task_and_removes_file() {
    let dir = tempdir().unwrap();
    let remote = ScriptedRemote::new()
        .with_object("o", payload(64, 0), "id")
        .fail(Op::FetchRange, Some("o@32"), RemoteError::Network("reset".into()))
        .shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let handle = TaskHandle::detached("t");
    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), handle.clone())
        .unwrap();
    let err = engine.transfer(&mut task).await.unwrap_err();

    assert!(matches!(err, TransferError::Remote(RemoteError::Network(_))));
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(handle.state(), TaskState::Failed);
    // A local failure does not cancel the enclosing task
    assert!(!handle.is_cancelled());
    assert!(leftovers(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancel_stops_scheduling_new_chunks() {
    let dir = tempdir().unwrap();
    let registry = CancellationRegistry::new();
    let registration = registry.register("relay").unwrap();
    let handle = registration.handle().clone();

    let remote = ScriptedRemote::new()
        .with_object("o", payload(64, 0), "id")
        .shared();
    {
        let registry = registry.clone();
        remote.on_call(move |call| {
            if call.op == Op::FetchRange {
                registry.request_cancel(&"relay".into());
            }
        });
    }
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        max_concurrent_chunks: 1,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), handle.clone())
        .unwrap();
    let err = engine.transfer(&mut task).await.unwrap_err();

    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(remote.calls_to(Op::FetchRange).len(), 1);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(handle.cancel_reason(), Some(CancelReason::User));
    assert!(leftovers(dir.path()).is_empty());

    assert_eq!(registration.finish(TaskState::Cancelled), TaskState::Cancelled);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_rate_limit_waits_then_succeeds() {
    let dir = tempdir().unwrap();
    let data = payload(48, 5);
    let remote = ScriptedRemote::new()
        .with_object("o", data.clone(), "id")
        .rate_limit(Op::FetchRange, Some("o@16"), 5)
        .shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let handle = TaskHandle::detached("t");
    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), handle.clone())
        .unwrap();
    let artifact = engine.transfer(&mut task).await.unwrap();

    let attempts: Vec<_> = remote
        .calls_to(Op::FetchRange)
        .into_iter()
        .filter(|c| c.key == "o@16")
        .collect();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1].at.duration_since(attempts[0].at) >= Duration::from_secs(5));
    assert_eq!(std::fs::read(artifact.path()).unwrap(), data);
    assert!(!handle.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_rate_limit_flood_stops_task() {
    let dir = tempdir().unwrap();
    let remote = ScriptedRemote::new()
        .with_object("o", payload(48, 5), "id")
        .rate_limit(Op::FetchRange, Some("o@16"), 5)
        .rate_limit(Op::FetchRange, Some("o@16"), 7)
        .shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        max_concurrent_chunks: 1,
        ..config_in(dir.path())
    };
    let engine = ChunkedTransferEngine::new(remote.clone(), &config);

    let handle = TaskHandle::detached("t");
    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), handle.clone())
        .unwrap();
    let err = engine.transfer(&mut task).await.unwrap_err();

    assert!(matches!(err, TransferError::FloodStop { wait_secs: 7 }));
    assert!(err.is_fatal());
    assert_eq!(remote.count(Op::FetchRange, "o@16"), 2);
    // Siblings scheduled after the flood stop never ran
    assert_eq!(remote.count(Op::FetchRange, "o@32"), 0);
    assert_eq!(
        handle.cancel_reason(),
        Some(CancelReason::FloodStop { wait_secs: 7 })
    );
    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(leftovers(dir.path()).is_empty());
}

#[tokio::test]
async fn test_progress_events_published() {
    let dir = tempdir().unwrap();
    let remote = ScriptedRemote::new()
        .with_object("o", payload(64, 2), "id")
        .shared();
    let config = ferry::TransferConfig {
        chunk_size_bytes: 16,
        ..config_in(dir.path())
    };
    let (publisher, subscriber) = ferry::ProgressPublisher::unbounded();
    let engine =
        ChunkedTransferEngine::new(remote.clone(), &config).with_sink(Arc::new(publisher));

    let mut task = engine
        .new_task(remote.metadata_of("o"), "out".into(), TaskHandle::detached("t"))
        .unwrap()
        .with_status(StatusPublisher::silent());
    engine.transfer(&mut task).await.unwrap();

    let events = subscriber.drain();
    assert!(matches!(
        events.first(),
        Some(ferry::ProgressEvent::TaskStarted { total_bytes: 64, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ferry::ProgressEvent::TaskFinished {
            bytes_done: 64,
            success: true,
            ..
        })
    ));
    for event in &events {
        if let ferry::ProgressEvent::Progress {
            bytes_done,
            total_bytes,
            ..
        } = event
        {
            assert!(bytes_done <= total_bytes);
        }
    }
}
