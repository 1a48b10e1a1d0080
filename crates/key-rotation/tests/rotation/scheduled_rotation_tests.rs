//! Scheduled rotation: each new key is vouched for by the current Active key,
//! and an outstanding publish is superseded when the timer fires again.

use crate::helpers::{
    cancelled_count, seeded_key_id, spawn_harness, test_config, wait_for_status, within,
};
use key_rotation::{KeyError, RotationState};
use metrics_util::debugging::DebuggingRecorder;
use key_rotation_test_utils::{MockKeyServer, PublishOutcome};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_rotation_is_signed_by_active_key() {
    let harness = spawn_harness(test_config(1), MockKeyServer::succeeding());

    let bootstrap = within(harness.manager.wait_for_active_key()).await.unwrap();
    assert_eq!(bootstrap.key_id(), seeded_key_id(1));

    let status = wait_for_status(&harness.manager, |s| s.completed_rotations >= 2).await;
    assert_eq!(status.active_key_id, Some(seeded_key_id(2)));

    let records = harness.server.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].key_id, seeded_key_id(2));
    assert_eq!(records[1].signer_key_id, seeded_key_id(1));
    assert!(!records[1].self_signed);
    assert!(records[1].signature_valid);
    assert!(records[1].signer_trusted);

    assert_eq!(
        harness.manager.active_key().unwrap().key_id(),
        seeded_key_id(2)
    );

    harness.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rotation_discards_previous_active_key() {
    let harness = spawn_harness(test_config(1), MockKeyServer::succeeding());

    let bootstrap = within(harness.manager.wait_for_active_key()).await.unwrap();
    wait_for_status(&harness.manager, |s| s.completed_rotations >= 2).await;

    // The manager no longer holds the bootstrap key anywhere
    assert_eq!(Arc::strong_count(&bootstrap), 1);

    harness.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_active_key_is_always_most_recent_success() {
    let harness = spawn_harness(test_config(1), MockKeyServer::succeeding());
    let mut status_rx = harness.manager.subscribe();

    loop {
        within(status_rx.changed()).await.unwrap();
        let status = status_rx.borrow_and_update().clone();

        // Every publish succeeds, so the n-th success is the n-th seeded key
        match status.completed_rotations {
            0 => assert!(status.active_key_id.is_none()),
            n => assert_eq!(
                status.active_key_id,
                Some(seeded_key_id(u8::try_from(n).unwrap()))
            ),
        }

        if status.completed_rotations >= 5 {
            break;
        }
    }

    let records = harness.server.records();
    for pair in records.windows(2) {
        assert_eq!(pair[1].signer_key_id, pair[0].key_id);
        assert!(pair[1].signer_trusted);
    }

    harness.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timer_preempts_outstanding_publish() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _recorder_guard = metrics::set_default_local_recorder(&recorder);

    let harness = spawn_harness(test_config(1), MockKeyServer::holding());

    within(harness.server.wait_for_publishes(1)).await;
    assert_eq!(harness.server.is_cancelled(0), Some(false));

    // Bootstrap is still outstanding when the timer fires
    within(harness.server.wait_for_publishes(2)).await;

    assert_eq!(harness.server.is_cancelled(0), Some(true));
    assert_eq!(harness.server.is_cancelled(1), Some(false));
    assert_eq!(harness.server.cancelled_indices(), vec![0]);
    assert_eq!(harness.manager.pending_key_id(), Some(seeded_key_id(2)));

    // The bootstrap publish was cancelled once, before its replacement went out
    assert_eq!(cancelled_count(&snapshotter, "superseded"), 1);
    let records = harness.server.records();
    assert!(records[1].live_at_submit.is_empty());

    // Nothing was Active, so the replacement signs itself
    assert!(records[1].self_signed);
    assert_eq!(records[1].signer_key_id, seeded_key_id(2));

    // A late answer for the superseded publish is never observed
    assert!(!harness.server.complete(0, Ok(())));
    assert!(matches!(
        harness.manager.active_key(),
        Err(KeyError::NoActiveKey)
    ));

    assert!(harness.server.complete(1, Ok(())));
    let key = within(harness.manager.wait_for_active_key()).await.unwrap();

    assert_eq!(key.key_id(), seeded_key_id(2));
    assert!(!harness.server.is_trusted(&seeded_key_id(1)));

    // Idle at shutdown: nothing left to cancel
    harness.handle.shutdown().await.unwrap();
    assert_eq!(cancelled_count(&snapshotter, "superseded"), 1);
    assert_eq!(cancelled_count(&snapshotter, "shutdown"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_rotation_keeps_serving_active_key() {
    let server = MockKeyServer::builder()
        .then(PublishOutcome::Succeed)
        .otherwise(PublishOutcome::Hold)
        .build();
    let harness = spawn_harness(test_config(1), server);

    let bootstrap = within(harness.manager.wait_for_active_key()).await.unwrap();

    // Rotations at 1s and 2s are both held; the second supersedes the first
    within(harness.server.wait_for_publishes(3)).await;

    assert_eq!(harness.server.cancelled_indices(), vec![1]);
    assert_eq!(harness.manager.pending_key_id(), Some(seeded_key_id(3)));
    assert_eq!(
        harness.manager.active_key().unwrap().key_id(),
        bootstrap.key_id()
    );

    let records = harness.server.records();
    assert_eq!(records[2].signer_key_id, bootstrap.key_id());
    assert!(records[2].live_at_submit.is_empty());

    let status = harness.manager.status();
    assert_eq!(status.state, RotationState::AwaitingPublish);
    assert_eq!(status.completed_rotations, 1);

    harness.handle.shutdown().await.unwrap();
}
