//! Shared setup for rotation integration tests.

use key_rotation::{
    KeyGenerator, KeyLifecycleManager, KeyManagerBuilder, KeyServerConfig, RotationConfig,
    RotationHandle, RotationStatus,
};
use key_rotation_test_utils::{
    init_test_tracing, test_signing_key, FatalRecorder, MockKeyServer, SeededKeyGenerator,
};
use metrics_util::debugging::{DebugValue, Snapshotter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single wait. Time is paused, so this only trips when
/// the awaited event can never happen.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(3600);

pub fn test_config(rotation_interval_secs: i64) -> RotationConfig {
    RotationConfig::new(
        "https://issuer.test",
        KeyServerConfig {
            endpoint: "https://keys.test".to_string(),
        },
    )
    .with_rotation_interval_secs(rotation_interval_secs)
}

/// Key id of the n-th key handed out by a [`SeededKeyGenerator`].
pub fn seeded_key_id(seed: u8) -> String {
    test_signing_key(seed).unwrap().key_id().to_string()
}

pub struct Harness {
    pub server: Arc<MockKeyServer>,
    pub fatal: FatalRecorder,
    pub handle: RotationHandle,
    pub manager: KeyLifecycleManager,
}

pub fn spawn_harness(config: RotationConfig, server: MockKeyServer) -> Harness {
    spawn_harness_with_generator(config, server, Arc::new(SeededKeyGenerator::new()))
}

pub fn spawn_harness_with_generator(
    config: RotationConfig,
    server: MockKeyServer,
    generator: Arc<dyn KeyGenerator>,
) -> Harness {
    init_test_tracing();

    let server = Arc::new(server);
    let fatal = FatalRecorder::new();
    let (handle, manager) = KeyManagerBuilder::new(config, server.clone())
        .with_key_generator(generator)
        .with_fatal_handler(fatal.handler())
        .spawn();

    Harness {
        server,
        fatal,
        handle,
        manager,
    }
}

/// Await `future`, failing the test if it does not finish in time.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("timed out waiting for rotation event")
}

/// Wait until the published status satisfies `predicate`.
pub async fn wait_for_status(
    manager: &KeyLifecycleManager,
    predicate: impl FnMut(&RotationStatus) -> bool,
) -> RotationStatus {
    let mut status_rx = manager.subscribe();
    let status = within(status_rx.wait_for(predicate))
        .await
        .expect("rotation loop exited before reaching the expected status")
        .clone();
    status
}

/// `key_rotation_publish_cancelled_total{reason}` recorded so far.
pub fn cancelled_count(snapshotter: &Snapshotter, reason: &str) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(composite, _, _, value)| {
            let key = composite.key();
            let matches = key.name() == "key_rotation_publish_cancelled_total"
                && key
                    .labels()
                    .any(|label| label.key() == "reason" && label.value() == reason);
            match value {
                DebugValue::Counter(count) if matches => Some(count),
                _ => None,
            }
        })
        .unwrap_or(0)
}
