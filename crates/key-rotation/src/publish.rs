//! Publish operations.
//!
//! A [`PublishOperation`] is the manager's handle on an asynchronous attempt
//! to publish a public key; the key-server client keeps the matching
//! [`PublishCompleter`] and reports the outcome through it.
//!
//! # Contract
//!
//! - The outcome is delivered at most once (`complete` consumes the completer).
//! - `cancel` is idempotent and safe after completion.
//! - Once cancelled, `result` never resolves, even if the client completed the
//!   operation concurrently. A cancelled attempt can therefore never be
//!   promoted to Active.

use crate::errors::PublishError;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Outcome = Result<(), PublishError>;

/// Manager-side handle on an in-flight publish.
#[derive(Debug)]
pub struct PublishOperation {
    outcome_rx: Option<oneshot::Receiver<Outcome>>,
    cancel_token: CancellationToken,
}

/// Client-side half used to report the outcome of a publish.
#[derive(Debug)]
pub struct PublishCompleter {
    outcome_tx: oneshot::Sender<Outcome>,
    cancel_token: CancellationToken,
}

impl PublishOperation {
    /// Create a linked operation/completer pair.
    #[must_use]
    pub fn new() -> (Self, PublishCompleter) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel_token = CancellationToken::new();

        let operation = Self {
            outcome_rx: Some(outcome_rx),
            cancel_token: cancel_token.clone(),
        };
        let completer = PublishCompleter {
            outcome_tx,
            cancel_token,
        };

        (operation, completer)
    }

    /// An operation that has already failed with `error`.
    #[must_use]
    pub fn failed(error: PublishError) -> Self {
        let (operation, completer) = Self::new();
        completer.complete(Err(error));
        operation
    }

    /// An inert operation that never completes.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            outcome_rx: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Cancel the operation. No-op if already cancelled or completed.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait for the terminal outcome.
    ///
    /// Resolves at most once. Never resolves for a cancelled or inert
    /// operation, or after the outcome has already been returned. Safe to use
    /// in `tokio::select!`: dropping the future does not lose the outcome.
    pub async fn result(&mut self) -> Result<(), PublishError> {
        let Some(outcome_rx) = self.outcome_rx.as_mut() else {
            return std::future::pending().await;
        };

        let received = tokio::select! {
            biased;

            () = self.cancel_token.cancelled() => None,
            received = outcome_rx => Some(received),
        };
        self.outcome_rx = None;

        match received {
            None => std::future::pending().await,
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => Err(PublishError::Abandoned),
        }
    }
}

impl PublishCompleter {
    /// Report the outcome.
    ///
    /// Returns `false` and delivers nothing if the operation was cancelled or
    /// the manager has dropped it.
    pub fn complete(self, outcome: Result<(), PublishError>) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        self.outcome_tx.send(outcome).is_ok()
    }

    /// Whether the manager cancelled the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once the manager cancels the operation.
    ///
    /// Clients can race this against their network call to abandon work
    /// for a superseded publish.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await;
    }
}
