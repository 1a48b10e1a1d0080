//! Shutdown: the stop signal cancels any outstanding publish exactly once and
//! the loop exits without touching the keys.

use crate::helpers::{
    cancelled_count, seeded_key_id, spawn_harness, test_config, wait_for_status, within,
};
use key_rotation::{KeyError, KeyManagerBuilder, PublishError, RotationState};
use key_rotation_test_utils::{FatalRecorder, MockKeyServer, SeededKeyGenerator};
use metrics_util::debugging::DebuggingRecorder;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_outstanding_publish() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _recorder_guard = metrics::set_default_local_recorder(&recorder);

    let harness = spawn_harness(test_config(1), MockKeyServer::holding());

    within(harness.server.wait_for_publishes(1)).await;
    harness.handle.shutdown().await.unwrap();

    assert_eq!(cancelled_count(&snapshotter, "shutdown"), 1);
    assert_eq!(cancelled_count(&snapshotter, "superseded"), 0);

    assert_eq!(harness.server.is_cancelled(0), Some(true));
    assert_eq!(harness.server.cancelled_indices(), vec![0]);
    assert!(!harness.server.complete(0, Ok(())));

    // No further publishes once stopped, even after many intervals
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.server.publish_count(), 1);

    assert!(matches!(
        harness.manager.active_key(),
        Err(KeyError::NoActiveKey)
    ));
    assert_eq!(harness.manager.status().state, RotationState::Stopped);
    assert_eq!(harness.fatal.fired(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_idle_keeps_active_key() {
    let harness = spawn_harness(test_config(1), MockKeyServer::succeeding());

    let key = within(harness.manager.wait_for_active_key()).await.unwrap();
    let published = harness.server.publish_count();

    harness.handle.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.server.publish_count(), published);
    assert_eq!(harness.manager.active_key().unwrap().key_id(), key.key_id());
    assert_eq!(harness.manager.status().state, RotationState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_skips_retry() {
    let harness = spawn_harness(
        test_config(0).with_max_publish_attempts(3),
        MockKeyServer::failing(PublishError::Unavailable("timeout".to_string())),
    );

    wait_for_status(&harness.manager, |s| s.state == RotationState::BackingOff).await;
    harness.handle.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.server.publish_count(), 1);
    assert_eq!(harness.fatal.fired(), 0);
    assert_eq!(harness.manager.status().state, RotationState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let harness = spawn_harness(test_config(1), MockKeyServer::holding());
    within(harness.server.wait_for_publishes(1)).await;

    harness.handle.stop();
    harness.handle.stop();
    harness.handle.shutdown().await.unwrap();

    assert_eq!(harness.server.cancelled_indices(), vec![0]);
    assert_eq!(harness.manager.status().state, RotationState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_service_shutdown_token_stops_rotation() {
    let service_shutdown = CancellationToken::new();
    let server = Arc::new(MockKeyServer::succeeding());
    let fatal = FatalRecorder::new();

    let (handle, manager) = KeyManagerBuilder::new(test_config(1), server.clone())
        .with_key_generator(Arc::new(SeededKeyGenerator::new()))
        .with_fatal_handler(fatal.handler())
        .with_shutdown_token(service_shutdown.clone())
        .spawn();

    within(manager.wait_for_active_key()).await.unwrap();
    service_shutdown.cancel();
    within(handle.join()).await.unwrap();

    assert_eq!(manager.status().state, RotationState::Stopped);
    assert_eq!(manager.active_key().unwrap().key_id(), seeded_key_id(1));
    assert_eq!(fatal.fired(), 0);
}
