mod common;

use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use screen_recorder::error::{CaptureError, RecorderError};
use screen_recorder::recorder::RecorderEvent;
use screen_recorder::session::{SessionLimits, SessionState, StopReason};
use screen_recorder::store::DurableStore;

use common::{
    open_store, recorder_with, relaxed_limits, session_config, wait_until, FlakyStore,
    ScriptedFailure, ScriptedPlatform,
};

/// Helper to wait for the first event matching `predicate`
async fn wait_for_event<F>(events: &mut broadcast::Receiver<RecorderEvent>, predicate: F) -> RecorderEvent
where
    F: Fn(&RecorderEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_three_chunks_make_one_recording() {
    let (store, _guard) = open_store().await;
    let store: Arc<dyn DurableStore> = Arc::new(store);
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::clone(&store), platform.clone());

    let session_id = recorder.start(session_config(relaxed_limits())).await.unwrap();
    assert_eq!(recorder.state(), SessionState::Active);

    let stream = platform.stream();
    let chunks: [&[u8]; 3] = [b"0123456789", b"abcdefghij", b"ABCDEFGHIJ"];
    for payload in chunks {
        assert!(stream.push(payload).await);
    }

    let outcome = recorder.stop().await.unwrap();
    assert_eq!(outcome.session_id, session_id);
    assert_eq!(outcome.reason, StopReason::User);
    assert_eq!(recorder.state(), SessionState::Committed);
    assert!(stream.is_stopped());

    let recordings = catalog.list().await.unwrap();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].size_bytes, 30);
    assert_eq!(recordings[0].id, outcome.recording.id);
    assert_eq!(recordings[0].title, "Recording 1");

    let payload = catalog.playback(recordings[0].id).await.unwrap();
    assert_eq!(payload, Bytes::from_static(b"0123456789abcdefghijABCDEFGHIJ"));
    assert!(store.chunks_for_session(session_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());

    let session_id = recorder.start(session_config(relaxed_limits())).await.unwrap();
    platform.stream().push(b"data").await;

    match recorder.start(session_config(relaxed_limits())).await {
        Err(RecorderError::SessionAlreadyActive(state)) => assert_eq!(state, SessionState::Active),
        other => panic!("expected SessionAlreadyActive, got {:?}", other),
    }
    assert_eq!(recorder.state(), SessionState::Active);
    assert_eq!(recorder.status().session_id, Some(session_id));
    assert_eq!(platform.stream_count(), 1);

    recorder.pause().await;
    assert!(matches!(
        recorder.start(session_config(relaxed_limits())).await,
        Err(RecorderError::SessionAlreadyActive(SessionState::Paused))
    ));

    let outcome = recorder.stop().await.unwrap();
    assert_eq!(outcome.session_id, session_id);
    assert_eq!(outcome.recording.size_bytes, 4);
}

#[tokio::test]
async fn test_new_session_after_commit() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::new(store), platform.clone());

    let first = recorder.start(session_config(relaxed_limits())).await.unwrap();
    platform.stream().push(b"one").await;
    recorder.stop().await.unwrap();

    let second = recorder.start(session_config(relaxed_limits())).await.unwrap();
    assert!(second > first);
    platform.stream().push(b"two").await;
    recorder.stop().await.unwrap();

    let titles: Vec<String> = catalog
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"Recording 1".to_string()));
    assert!(titles.contains(&"Recording 2".to_string()));
}

#[tokio::test]
async fn test_pause_excludes_paused_interval_from_duration() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());

    recorder.start(session_config(relaxed_limits())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(recorder.pause().await);
    assert_eq!(recorder.state(), SessionState::Paused);
    assert!(platform.stream().is_paused());
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(recorder.resume().await);
    assert_eq!(recorder.state(), SessionState::Active);
    assert!(!platform.stream().is_paused());
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = recorder.stop().await.unwrap();
    let duration = outcome.recording.duration_secs;
    assert!(duration >= 0.29, "duration {} too short", duration);
    assert!(duration < 0.6, "duration {} includes the pause", duration);
}

#[tokio::test]
async fn test_pause_and_resume_are_noops_from_wrong_state() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());

    assert!(!recorder.pause().await);
    assert!(!recorder.resume().await);
    assert_eq!(recorder.state(), SessionState::Idle);

    recorder.start(session_config(relaxed_limits())).await.unwrap();
    assert!(!recorder.resume().await);
    assert_eq!(recorder.state(), SessionState::Active);

    assert!(recorder.pause().await);
    assert!(!recorder.pause().await);
    assert_eq!(recorder.state(), SessionState::Paused);

    // Stop is valid from Paused
    recorder.stop().await.unwrap();
    assert!(!recorder.pause().await);
    assert_eq!(recorder.state(), SessionState::Committed);
}

#[tokio::test]
async fn test_stop_while_paused_commits_everything_captured() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::new(store), platform.clone());

    recorder.start(session_config(relaxed_limits())).await.unwrap();
    let stream = platform.stream();
    assert!(stream.push(b"before ").await);
    assert!(stream.push(b"pause").await);
    assert!(recorder.pause().await);

    let outcome = recorder.stop().await.unwrap();
    assert_eq!(outcome.reason, StopReason::User);
    assert_eq!(recorder.state(), SessionState::Committed);
    assert!(stream.is_stopped());

    let payload = catalog.playback(outcome.recording.id).await.unwrap();
    assert_eq!(payload, Bytes::from_static(b"before pause"));
}

#[tokio::test]
async fn test_suspend_notice_requests_a_chunk() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());

    // Nothing to flush without a session
    recorder.notify_suspended();

    recorder.start(session_config(relaxed_limits())).await.unwrap();
    let stream = platform.stream();
    let before = stream.flush_requests();

    recorder.notify_suspended();
    assert!(wait_until(|| stream.flush_requests() == before + 1).await);

    recorder.notify_suspended();
    assert!(wait_until(|| stream.flush_requests() == before + 2).await);

    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_staging_failures_still_commit_full_recording() {
    let (store, _guard) = open_store().await;
    let flaky = FlakyStore::new(store);
    flaky.fail_chunks.store(true, Ordering::SeqCst);
    let store: Arc<dyn DurableStore> = flaky.clone();
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::clone(&store), platform.clone());

    // Small enough that every push crosses the threshold and tries to stage
    let limits = SessionLimits {
        max_buffered_bytes: 15,
        ..relaxed_limits()
    };
    let session_id = recorder.start(session_config(limits)).await.unwrap();
    let stream = platform.stream();
    for payload in [&b"0123456789"[..], &b"abcdefghij"[..], &b"ABCDEFGHIJ"[..]] {
        assert!(stream.push(payload).await);
    }

    let outcome = recorder.stop().await.unwrap();
    assert_eq!(outcome.recording.size_bytes, 30);
    let payload = catalog.playback(outcome.recording.id).await.unwrap();
    assert_eq!(payload, Bytes::from_static(b"0123456789abcdefghijABCDEFGHIJ"));
    assert!(store.chunks_for_session(session_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_without_session_fails() {
    let (store, _guard) = open_store().await;
    let (recorder, _catalog) = recorder_with(Arc::new(store), ScriptedPlatform::new());

    assert!(matches!(
        recorder.stop().await,
        Err(RecorderError::NotRecording(SessionState::Idle))
    ));
}

#[tokio::test]
async fn test_duration_limit_stops_session() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::new(store), platform.clone());
    let mut events = recorder.subscribe();

    let limits = SessionLimits {
        max_duration: Duration::from_millis(200),
        ..relaxed_limits()
    };
    let session_id = recorder.start(session_config(limits)).await.unwrap();
    platform.stream().push(b"short clip").await;

    let stopped = wait_for_event(&mut events, |e| matches!(e, RecorderEvent::Stopped { .. })).await;
    assert_eq!(
        stopped,
        RecorderEvent::Stopped {
            session_id,
            reason: StopReason::DurationLimit
        }
    );

    let committed =
        wait_for_event(&mut events, |e| matches!(e, RecorderEvent::Committed { .. })).await;
    if let RecorderEvent::Committed { recording, .. } = committed {
        assert_eq!(recording.size_bytes, 10);
        assert!(recording.duration_secs >= 0.19);
    }

    assert!(wait_until(|| recorder.state() == SessionState::Committed).await);
    assert!(platform.stream().is_stopped());
    assert_eq!(catalog.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_source_end_stops_session() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::new(store), platform.clone());
    let mut events = recorder.subscribe();

    let session_id = recorder.start(session_config(relaxed_limits())).await.unwrap();
    let stream = platform.stream();
    stream.push(b"before the share was revoked").await;
    stream.end().await;

    let stopped = wait_for_event(&mut events, |e| matches!(e, RecorderEvent::Stopped { .. })).await;
    assert_eq!(
        stopped,
        RecorderEvent::Stopped {
            session_id,
            reason: StopReason::SourceEnded
        }
    );
    wait_for_event(&mut events, |e| matches!(e, RecorderEvent::Committed { .. })).await;

    let recordings = catalog.list().await.unwrap();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].size_bytes, 28);

    // A late user stop finds nothing to stop
    assert!(matches!(
        recorder.stop().await,
        Err(RecorderError::NotRecording(SessionState::Committed))
    ));
}

#[tokio::test]
async fn test_capture_failures_are_surfaced() {
    let (store, _guard) = open_store().await;
    let store: Arc<dyn DurableStore> = Arc::new(store);

    let (recorder, _catalog) = recorder_with(
        Arc::clone(&store),
        ScriptedPlatform::failing(ScriptedFailure::Unavailable),
    );
    assert!(matches!(
        recorder.start(session_config(relaxed_limits())).await,
        Err(RecorderError::Capture(CaptureError::Unavailable(_)))
    ));
    assert_eq!(recorder.state(), SessionState::Failed);

    // Failed is terminal for the session, a new start is allowed
    assert!(matches!(
        recorder.start(session_config(relaxed_limits())).await,
        Err(RecorderError::Capture(CaptureError::Unavailable(_)))
    ));

    let (recorder, _catalog) = recorder_with(
        Arc::clone(&store),
        ScriptedPlatform::failing(ScriptedFailure::PermissionDenied),
    );
    assert!(matches!(
        recorder.start(session_config(relaxed_limits())).await,
        Err(RecorderError::Capture(CaptureError::PermissionDenied(_)))
    ));
    assert_eq!(recorder.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_commit_failure_fails_session_and_keeps_chunks() {
    let (store, _guard) = open_store().await;
    let flaky = FlakyStore::new(store);
    let store: Arc<dyn DurableStore> = flaky.clone();
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::clone(&store), platform.clone());
    let mut events = recorder.subscribe();

    let session_id = recorder.start(session_config(relaxed_limits())).await.unwrap();
    for payload in [&b"aaaa"[..], &b"bbbb"[..], &b"cccc"[..]] {
        platform.stream().push(payload).await;
    }

    flaky.fail_recordings.store(true, Ordering::SeqCst);
    assert!(matches!(recorder.stop().await, Err(RecorderError::Commit(_))));
    assert_eq!(recorder.state(), SessionState::Failed);

    let failed =
        wait_for_event(&mut events, |e| matches!(e, RecorderEvent::CommitFailed { .. })).await;
    assert!(matches!(failed, RecorderEvent::CommitFailed { session_id: id, .. } if id == session_id));

    assert_eq!(store.chunks_for_session(session_id).await.unwrap().len(), 3);
    assert!(catalog.list().await.unwrap().is_empty());

    let orphans = catalog.orphaned_sessions().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].session_id, session_id);
    assert_eq!(orphans[0].total_bytes, 12);

    flaky.fail_recordings.store(false, Ordering::SeqCst);
    recorder.start(session_config(relaxed_limits())).await.unwrap();
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_buffer_threshold_flushes_memory_and_keeps_artifact_complete() {
    let (store, _guard) = open_store().await;
    let store: Arc<dyn DurableStore> = Arc::new(store);
    let platform = ScriptedPlatform::new();
    let (recorder, catalog) = recorder_with(Arc::clone(&store), platform.clone());

    let limits = SessionLimits {
        max_buffered_bytes: 25,
        ..relaxed_limits()
    };
    let session_id = recorder.start(session_config(limits)).await.unwrap();
    let stream = platform.stream();
    for fill in [1u8, 2, 3] {
        stream.push(&[fill; 10]).await;
    }

    assert!(wait_until(|| recorder.status().bytes_recorded == 30).await);
    let status = recorder.status();
    assert_eq!(status.buffered_bytes, 0);
    assert_eq!(status.memory_percent, 0.0);
    assert!(stream.flush_requests() >= 1);
    assert_eq!(store.chunks_for_session(session_id).await.unwrap().len(), 3);

    stream.push(&[4u8; 5]).await;
    assert!(wait_until(|| recorder.status().bytes_recorded == 35).await);
    assert_eq!(recorder.status().buffered_bytes, 5);
    assert!((recorder.status().memory_percent - 20.0).abs() < 1e-9);

    let outcome = recorder.stop().await.unwrap();
    let payload = catalog.playback(outcome.recording.id).await.unwrap();
    let mut expected = Vec::new();
    for fill in [1u8, 2, 3] {
        expected.extend_from_slice(&[fill; 10]);
    }
    expected.extend_from_slice(&[4u8; 5]);
    assert_eq!(payload.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_periodic_and_manual_flush_requests() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());

    assert!(!recorder.request_flush().await);

    let limits = SessionLimits {
        flush_interval: Duration::from_millis(50),
        ..relaxed_limits()
    };
    recorder.start(session_config(limits)).await.unwrap();
    let stream = platform.stream();

    assert!(wait_until(|| stream.flush_requests() >= 2).await);

    let before = stream.flush_requests();
    assert!(recorder.request_flush().await);
    assert!(stream.flush_requests() > before);

    let before = stream.flush_requests();
    recorder.notify_suspended();
    assert!(wait_until(|| stream.flush_requests() > before).await);

    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_device_warning_is_forwarded() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());
    let mut events = recorder.subscribe();

    let session_id = recorder.start(session_config(relaxed_limits())).await.unwrap();
    platform.stream().warn("microphone unavailable").await;

    let warning =
        wait_for_event(&mut events, |e| matches!(e, RecorderEvent::DeviceWarning { .. })).await;
    assert_eq!(
        warning,
        RecorderEvent::DeviceWarning {
            session_id,
            message: "microphone unavailable".to_string()
        }
    );
    assert_eq!(recorder.state(), SessionState::Active);
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_negotiated_mime_type_is_recorded() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::with_mime_types(&["video/webm", "video/mp4"]);
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());

    recorder.start(session_config(relaxed_limits())).await.unwrap();
    let constraints = platform.last_constraints.lock().unwrap().clone().unwrap();
    assert_eq!(constraints.mime_type, "video/mp4");
    assert_eq!(constraints.settings.width, 1280);

    let outcome = recorder.stop().await.unwrap();
    assert_eq!(outcome.recording.mime_type, "video/mp4");
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let (store, _guard) = open_store().await;
    let platform = ScriptedPlatform::new();
    let (recorder, _catalog) = recorder_with(Arc::new(store), platform.clone());
    let mut events = recorder.subscribe();

    recorder.start(session_config(relaxed_limits())).await.unwrap();
    recorder.pause().await;
    recorder.resume().await;
    recorder.stop().await.unwrap();

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RecorderEvent::StateChanged { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            SessionState::Requesting,
            SessionState::Active,
            SessionState::Paused,
            SessionState::Active,
            SessionState::Stopping,
            SessionState::Committed,
        ]
    );
}
