//! Background rotation loop.
//!
//! A single task sequences bootstrap, scheduled rotation and swap-on-success.
//! It is the only writer of the Active key and the only initiator of Pending
//! keys. Stop, timer, retry backoff and publish completion are serviced one at
//! a time from a biased `tokio::select!`, so at most one publish is ever
//! awaited and a superseded publish is always cancelled before its
//! replacement is submitted.
//!
//! # Failure policy
//!
//! A failed publish means no successor key is confirmed. Consecutive failures
//! are retried with exponential backoff (1s, 2s, 4s, ..., max 30s) until
//! `max_publish_attempts` is reached, then the fatal handler runs. The
//! default handler terminates the process. With the default of one attempt
//! the first failure is fatal.

use crate::config::RotationConfig;
use crate::crypto::KeyGenerator;
use crate::errors::PublishError;
use crate::key_server::KeyServerClient;
use crate::manager::KeyStore;
use crate::observability::metrics::{
    record_fatal_publish_failure, record_publish_attempt, record_publish_cancelled,
    record_publish_result, set_last_rotation_success,
};
use crate::publish::PublishOperation;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Initial backoff delay before retrying a failed publish.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Called when a publish failure cannot be tolerated any longer.
///
/// In production this never returns (see [`exit_process_on_fatal`]). If it
/// does return, the rotation loop stops in [`RotationState::Failed`].
pub type FatalHandler = Arc<dyn Fn(&PublishError) + Send + Sync>;

/// Fail-stop handler: log and terminate the process.
///
/// A signer that cannot confirm its successor key must not keep running with
/// an unverifiable trust state.
#[must_use]
pub fn exit_process_on_fatal() -> FatalHandler {
    Arc::new(|error: &PublishError| {
        error!(
            target: "key_rotation.rotation",
            error = %error,
            "Unable to publish signing key, terminating process"
        );
        std::process::exit(1);
    })
}

/// Where the rotation loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationState {
    /// Generating and submitting the first key.
    #[default]
    Bootstrapping,
    /// A publish is outstanding.
    AwaitingPublish,
    /// Nothing outstanding; waiting for the next scheduled rotation.
    Idle,
    /// Waiting to retry after a failed publish.
    BackingOff,
    /// Shut down via the stop signal.
    Stopped,
    /// A publish failure was escalated to the fatal handler.
    Failed,
}

impl RotationState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrapping => "bootstrapping",
            Self::AwaitingPublish => "awaiting_publish",
            Self::Idle => "idle",
            Self::BackingOff => "backing_off",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Snapshot published on every state transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationStatus {
    /// Where the loop is now.
    pub state: RotationState,
    /// Key currently served to signers.
    pub active_key_id: Option<String>,
    /// Key submitted for publication and not yet confirmed.
    pub pending_key_id: Option<String>,
    /// Publishes that succeeded and promoted a key to Active.
    pub completed_rotations: u64,
    /// Consecutive failed publishes since the last success.
    pub failed_attempts: u32,
}

/// Everything the loop owns for its lifetime.
pub(crate) struct RotationContext {
    pub(crate) config: RotationConfig,
    pub(crate) keys: Arc<KeyStore>,
    pub(crate) client: Arc<dyn KeyServerClient>,
    pub(crate) generator: Arc<dyn KeyGenerator>,
    pub(crate) on_fatal: FatalHandler,
    pub(crate) status_tx: watch::Sender<RotationStatus>,
}

#[derive(Debug, Default)]
struct Progress {
    completed_rotations: u64,
    failed_attempts: u32,
}

impl RotationContext {
    fn report(&self, state: RotationState, progress: &Progress) {
        let (active_key_id, pending_key_id) = self.keys.key_ids();
        self.status_tx.send_replace(RotationStatus {
            state,
            active_key_id,
            pending_key_id,
            completed_rotations: progress.completed_rotations,
            failed_attempts: progress.failed_attempts,
        });
    }

    fn attempt_publish(&self, trigger: &'static str) -> PublishOperation {
        record_publish_attempt(trigger);
        self.keys.attempt_publish(
            self.generator.as_ref(),
            self.client.as_ref(),
            self.keys.active(),
        )
    }
}

/// Run the rotation loop until stopped or a failure is escalated.
pub(crate) async fn run_rotation_loop(ctx: RotationContext, cancel_token: CancellationToken) {
    let mut progress = Progress::default();
    ctx.report(RotationState::Bootstrapping, &progress);

    info!(
        target: "key_rotation.rotation",
        issuer = %ctx.config.issuer,
        key_server = %ctx.config.key_server.endpoint,
        "Bootstrapping signing key"
    );

    // Active is empty here, so the bootstrap key signs itself.
    let mut operation = ctx.attempt_publish("bootstrap");
    let mut state = RotationState::AwaitingPublish;
    ctx.report(state, &progress);

    let mut ticker = rotation_ticker(ctx.config.rotation_interval);

    let mut backoff: Option<Pin<Box<Sleep>>> = None;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    let final_state = loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                info!(target: "key_rotation.rotation", "Shutting down key publisher");
                if state == RotationState::AwaitingPublish {
                    record_publish_cancelled("shutdown");
                }
                operation.cancel();
                break RotationState::Stopped;
            }
            () = next_tick(ticker.as_mut()) => {
                let (active_key, pending_key) = ctx.keys.key_ids();
                debug!(
                    target: "key_rotation.rotation",
                    active_key = ?active_key,
                    pending_key = ?pending_key,
                    "Generating new key"
                );
                if state == RotationState::AwaitingPublish {
                    record_publish_cancelled("superseded");
                }
                operation.cancel();
                backoff = None;
                operation = ctx.attempt_publish("scheduled");
                state = RotationState::AwaitingPublish;
                ctx.report(state, &progress);
            }
            () = wait_backoff(backoff.as_mut()) => {
                backoff = None;
                debug!(
                    target: "key_rotation.rotation",
                    attempt = progress.failed_attempts + 1,
                    "Retrying key publication"
                );
                operation = ctx.attempt_publish("retry");
                state = RotationState::AwaitingPublish;
                ctx.report(state, &progress);
            }
            outcome = operation.result() => {
                // Nothing left to observe on this operation
                operation = PublishOperation::pending();

                match outcome {
                    Ok(()) => {
                        ctx.keys.promote_pending();
                        record_publish_result("success");
                        set_last_rotation_success(chrono::Utc::now().timestamp());

                        progress.completed_rotations += 1;
                        progress.failed_attempts = 0;
                        backoff_ms = INITIAL_BACKOFF_MS;

                        let (active_key, pending_key) = ctx.keys.key_ids();
                        debug!(
                            target: "key_rotation.rotation",
                            active_key = ?active_key,
                            pending_key = ?pending_key,
                            "Successfully published key"
                        );

                        state = RotationState::Idle;
                        ctx.report(state, &progress);
                    }
                    Err(publish_error) => {
                        record_publish_result("error");
                        progress.failed_attempts = progress.failed_attempts.saturating_add(1);
                        let (active_key, pending_key) = ctx.keys.key_ids();

                        if progress.failed_attempts < ctx.config.max_publish_attempts {
                            warn!(
                                target: "key_rotation.rotation",
                                active_key = ?active_key,
                                pending_key = ?pending_key,
                                error = %publish_error,
                                attempt = progress.failed_attempts,
                                backoff_ms = backoff_ms,
                                "Error publishing key, will retry"
                            );
                            backoff = Some(Box::pin(tokio::time::sleep(Duration::from_millis(
                                backoff_ms,
                            ))));
                            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                            state = RotationState::BackingOff;
                            ctx.report(state, &progress);
                        } else {
                            error!(
                                target: "key_rotation.rotation",
                                active_key = ?active_key,
                                pending_key = ?pending_key,
                                error = %publish_error,
                                attempts = progress.failed_attempts,
                                "Error publishing key"
                            );
                            record_fatal_publish_failure();
                            (ctx.on_fatal)(&publish_error);
                            break RotationState::Failed;
                        }
                    }
                }
            }
        }
    };

    ctx.report(final_state, &progress);
    info!(
        target: "key_rotation.rotation",
        state = final_state.as_str(),
        completed_rotations = progress.completed_rotations,
        "Key rotation loop exited"
    );
}

/// Ticker for scheduled rotations, or `None` when rotation is disabled.
///
/// A zero period never ticks, and neither does one whose first deadline
/// cannot be represented.
fn rotation_ticker(rotation_interval: Option<Duration>) -> Option<Interval> {
    let Some(period) = rotation_interval.filter(|period| !period.is_zero()) else {
        info!(target: "key_rotation.rotation", "Key rotation is disabled");
        return None;
    };

    let Some(start) = Instant::now().checked_add(period) else {
        warn!(
            target: "key_rotation.rotation",
            interval_secs = period.as_secs(),
            "Rotation interval out of range, key rotation is disabled"
        );
        return None;
    };

    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

/// Next scheduled rotation, or never when rotation is disabled.
async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// End of the current retry backoff, or never when none is scheduled.
async fn wait_backoff(backoff: Option<&mut Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
