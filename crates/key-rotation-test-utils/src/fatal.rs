//! Fatal escalation recorder.
//!
//! Stands in for the fail-stop handler so tests can observe the escalation
//! instead of the test process exiting.

use key_rotation::{FatalHandler, PublishError};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Records every call to the fatal handler.
#[derive(Clone)]
pub struct FatalRecorder {
    errors: Arc<Mutex<Vec<PublishError>>>,
    fired_tx: Arc<watch::Sender<usize>>,
}

impl FatalRecorder {
    #[must_use]
    pub fn new() -> Self {
        let (fired_tx, _) = watch::channel(0);
        Self {
            errors: Arc::new(Mutex::new(Vec::new())),
            fired_tx: Arc::new(fired_tx),
        }
    }

    /// Handler to pass to `KeyManagerBuilder::with_fatal_handler`.
    #[must_use]
    pub fn handler(&self) -> FatalHandler {
        let recorder = self.clone();
        Arc::new(move |error: &PublishError| {
            recorder.errors.lock().unwrap().push(error.clone());
            recorder.fired_tx.send_modify(|fired| *fired += 1);
        })
    }

    /// Errors escalated so far.
    #[must_use]
    pub fn errors(&self) -> Vec<PublishError> {
        self.errors.lock().unwrap().clone()
    }

    /// Number of escalations so far.
    #[must_use]
    pub fn fired(&self) -> usize {
        *self.fired_tx.borrow()
    }

    /// Wait for the first escalation.
    pub async fn wait_for_fatal(&self) {
        let mut fired_rx = self.fired_tx.subscribe();
        let _ = fired_rx.wait_for(|fired| *fired > 0).await;
    }
}

impl Default for FatalRecorder {
    fn default() -> Self {
        Self::new()
    }
}
