//! Key lifecycle manager.
//!
//! Owns the Active key (servable to callers) and the Pending key (submitted
//! for publication, not yet confirmed). Both live in a single [`KeyStore`]
//! behind one mutex; every read and write goes through its accessor methods.
//!
//! # Example
//!
//! ```rust,ignore
//! use key_rotation::{spawn_key_manager, KeyServerConfig, RotationConfig};
//!
//! let config = RotationConfig::new(
//!     "https://issuer.example",
//!     KeyServerConfig { endpoint: "https://keys.example".to_string() },
//! );
//!
//! let (handle, manager) = spawn_key_manager(config, client);
//!
//! // Block startup until the bootstrap key is published
//! let key = manager.wait_for_active_key().await?;
//!
//! // On every signing request
//! let key = manager.active_key()?;
//!
//! // Cancel any in-flight publish and stop rotating
//! handle.shutdown().await?;
//! ```

use crate::config::RotationConfig;
use crate::crypto::{Ed25519KeyGenerator, KeyGenerator, SigningKey};
use crate::errors::{KeyError, PublishError};
use crate::key_server::KeyServerClient;
use crate::publish::PublishOperation;
use crate::rotation::{
    exit_process_on_fatal, run_rotation_loop, FatalHandler, RotationContext, RotationStatus,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

// =============================================================================
// Key Store
// =============================================================================

#[derive(Default)]
struct KeySlots {
    active: Option<Arc<SigningKey>>,
    pending: Option<Arc<SigningKey>>,
}

/// Active/Pending pair behind a single non-reentrant lock.
///
/// Critical sections never await: they cover key generation, submission to
/// the key server client (which returns immediately) and the swap on
/// success. Readers are therefore never delayed by network I/O.
#[derive(Default)]
pub(crate) struct KeyStore {
    slots: Mutex<KeySlots>,
}

impl KeyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // Slots are plain `Option`s replaced wholesale, so a poisoned guard
    // still holds a consistent pair.
    fn lock(&self) -> MutexGuard<'_, KeySlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn active(&self) -> Option<Arc<SigningKey>> {
        self.lock().active.clone()
    }

    pub(crate) fn pending_key_id(&self) -> Option<String> {
        self.lock()
            .pending
            .as_ref()
            .map(|key| key.key_id().to_string())
    }

    /// `(active, pending)` key ids for logging and status snapshots.
    pub(crate) fn key_ids(&self) -> (Option<String>, Option<String>) {
        let slots = self.lock();
        (
            slots.active.as_ref().map(|key| key.key_id().to_string()),
            slots.pending.as_ref().map(|key| key.key_id().to_string()),
        )
    }

    /// Generate a new Pending key and submit it for publication.
    ///
    /// Any previous Pending key is abandoned. The key is signed by `signer`
    /// when given, otherwise it signs itself (bootstrap). A generation failure
    /// is returned as an already-failed operation so the caller always has an
    /// operation to wait on.
    pub(crate) fn attempt_publish(
        &self,
        generator: &dyn KeyGenerator,
        client: &dyn KeyServerClient,
        signer: Option<Arc<SigningKey>>,
    ) -> PublishOperation {
        let mut slots = self.lock();

        let pending = match generator.generate() {
            Ok(key) => Arc::new(key),
            Err(e) => {
                slots.pending = None;
                return PublishOperation::failed(PublishError::KeyGeneration(e.to_string()));
            }
        };
        slots.pending = Some(Arc::clone(&pending));

        let public_key = pending.public_key();
        let signer = signer.unwrap_or_else(|| Arc::clone(&pending));

        debug!(
            target: "key_rotation.manager",
            pending_key = %pending.key_id(),
            signer_key = %signer.key_id(),
            self_signed = Arc::ptr_eq(&signer, &pending),
            "Submitting key for publication"
        );

        client.publish(public_key, signer)
    }

    /// Swap Pending into Active, discarding the previous Active.
    ///
    /// Returns the new Active key. Without a Pending key the slots are left
    /// unchanged.
    pub(crate) fn promote_pending(&self) -> Option<Arc<SigningKey>> {
        let mut slots = self.lock();
        if let Some(pending) = slots.pending.take() {
            slots.active = Some(pending);
        }
        slots.active.clone()
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Read side of the key lifecycle: cheap to clone and share across request
/// handlers.
#[derive(Clone)]
pub struct KeyLifecycleManager {
    keys: Arc<KeyStore>,
    status_rx: watch::Receiver<RotationStatus>,
}

impl KeyLifecycleManager {
    /// The key to sign new tokens with.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::NoActiveKey` until the first publish succeeds.
    pub fn active_key(&self) -> Result<Arc<SigningKey>, KeyError> {
        self.keys.active().ok_or(KeyError::NoActiveKey)
    }

    /// Id of the key currently being published, if any.
    #[must_use]
    pub fn pending_key_id(&self) -> Option<String> {
        self.keys.pending_key_id()
    }

    /// Latest rotation status snapshot.
    #[must_use]
    pub fn status(&self) -> RotationStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified on every rotation state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RotationStatus> {
        self.status_rx.clone()
    }

    /// Wait until a key is Active.
    ///
    /// Callers bound this with their own startup timeout.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::RotationStopped` if the rotation loop exits before
    /// any publish succeeds.
    pub async fn wait_for_active_key(&self) -> Result<Arc<SigningKey>, KeyError> {
        let mut status_rx = self.status_rx.clone();
        status_rx
            .wait_for(|status| status.active_key_id.is_some())
            .await
            .map_err(|_| KeyError::RotationStopped)?;

        self.active_key()
    }
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (active, pending) = self.keys.key_ids();
        f.debug_struct("KeyLifecycleManager")
            .field("active_key", &active)
            .field("pending_key", &pending)
            .finish()
    }
}

// =============================================================================
// Rotation Handle
// =============================================================================

/// Owned handle on the background rotation task.
///
/// Dropping the handle signals the loop to stop, so the task cannot outlive
/// its owner unnoticed.
#[derive(Debug)]
pub struct RotationHandle {
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RotationHandle {
    /// Ask the loop to cancel any in-flight publish and exit. Idempotent.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Task` if the task panicked or was aborted.
    pub async fn shutdown(mut self) -> Result<(), KeyError> {
        self.stop();
        self.wait().await
    }

    /// Wait for the loop to exit on its own (stop signal from a parent token
    /// or fatal escalation).
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Task` if the task panicked or was aborted.
    pub async fn join(mut self) -> Result<(), KeyError> {
        self.wait().await
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    async fn wait(&mut self) -> Result<(), KeyError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| KeyError::Task(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel_token.cancel();
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configures and spawns a key lifecycle manager.
pub struct KeyManagerBuilder {
    config: RotationConfig,
    client: Arc<dyn KeyServerClient>,
    generator: Arc<dyn KeyGenerator>,
    on_fatal: FatalHandler,
    shutdown_token: Option<CancellationToken>,
}

impl KeyManagerBuilder {
    /// Builder with the Ed25519 generator and the fail-stop fatal handler.
    #[must_use]
    pub fn new(config: RotationConfig, client: Arc<dyn KeyServerClient>) -> Self {
        Self {
            config,
            client,
            generator: Arc::new(Ed25519KeyGenerator),
            on_fatal: exit_process_on_fatal(),
            shutdown_token: None,
        }
    }

    /// Use a different key generator.
    #[must_use]
    pub fn with_key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Replace the fatal escalation hook.
    #[must_use]
    pub fn with_fatal_handler(mut self, on_fatal: FatalHandler) -> Self {
        self.on_fatal = on_fatal;
        self
    }

    /// Stop the loop when `token` (e.g. the service's shutdown token) is
    /// cancelled. The loop listens on a child token.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Spawn the rotation loop on the current tokio runtime.
    ///
    /// The bootstrap publish starts immediately; use
    /// [`KeyLifecycleManager::wait_for_active_key`] to wait for it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime (as `tokio::spawn` does).
    #[must_use]
    pub fn spawn(self) -> (RotationHandle, KeyLifecycleManager) {
        let keys = Arc::new(KeyStore::new());
        let (status_tx, status_rx) = watch::channel(RotationStatus::default());
        let cancel_token = self
            .shutdown_token
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);

        let span = tracing::info_span!("key_rotation", issuer = %self.config.issuer);
        let ctx = RotationContext {
            config: self.config,
            keys: Arc::clone(&keys),
            client: self.client,
            generator: self.generator,
            on_fatal: self.on_fatal,
            status_tx,
        };

        let task = tokio::spawn(run_rotation_loop(ctx, cancel_token.clone()).instrument(span));

        (
            RotationHandle {
                cancel_token,
                task: Some(task),
            },
            KeyLifecycleManager { keys, status_rx },
        )
    }
}

/// Spawn a key lifecycle manager with the default generator and fail-stop
/// policy.
#[must_use]
pub fn spawn_key_manager(
    config: RotationConfig,
    client: Arc<dyn KeyServerClient>,
) -> (RotationHandle, KeyLifecycleManager) {
    KeyManagerBuilder::new(config, client).spawn()
}
