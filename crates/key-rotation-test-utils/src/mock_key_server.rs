//! Mock key server for rotation tests.
//!
//! Records every publication and completes it according to a script of
//! outcomes. Held publications stay outstanding until the test completes
//! them, which is how tests observe cancellation and pre-emption.
//!
//! The mock also plays the trust role of a real key server: it verifies the
//! publication signature and tracks which signers it already trusts
//! (self-signed bootstrap keys, or keys it previously accepted).
//!
//! # Example
//!
//! ```rust,ignore
//! use key_rotation_test_utils::{MockKeyServer, PublishOutcome};
//!
//! let server = Arc::new(
//!     MockKeyServer::builder()
//!         .then(PublishOutcome::Hold)
//!         .otherwise(PublishOutcome::Succeed)
//!         .build(),
//! );
//!
//! server.wait_for_publishes(1).await;
//! assert!(server.complete(0, Ok(())));
//! ```

use key_rotation::{
    KeyServerClient, PublicKey, PublishCompleter, PublishError, PublishOperation, SigningKey,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// How the mock answers a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Complete successfully before `publish` returns.
    Succeed,
    /// Fail with the given error before `publish` returns.
    Fail(PublishError),
    /// Leave outstanding until [`MockKeyServer::complete`] is called.
    Hold,
    /// Drop the completer without reporting an outcome.
    Abandon,
}

/// One call to `publish`, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub index: usize,
    pub key_id: String,
    pub signer_key_id: String,
    /// Key vouched for itself (bootstrap).
    pub self_signed: bool,
    /// Signature over the public key verified against the signer.
    pub signature_valid: bool,
    /// Signer was self, or a key this server accepted earlier.
    pub signer_trusted: bool,
    /// Held publications not yet cancelled when this one was submitted.
    pub live_at_submit: Vec<usize>,
    pub outcome: PublishOutcome,
}

#[derive(Default)]
struct MockState {
    records: Vec<PublishRecord>,
    held: HashMap<usize, PublishCompleter>,
    trusted: HashSet<String>,
}

/// In-memory [`KeyServerClient`].
pub struct MockKeyServer {
    script: Mutex<VecDeque<PublishOutcome>>,
    default_outcome: PublishOutcome,
    state: Mutex<MockState>,
    published_tx: watch::Sender<usize>,
}

impl MockKeyServer {
    /// Create a MockKeyServer builder.
    #[must_use]
    pub fn builder() -> MockKeyServerBuilder {
        MockKeyServerBuilder::default()
    }

    /// Accept every publication immediately.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::builder().otherwise(PublishOutcome::Succeed).build()
    }

    /// Reject every publication immediately.
    #[must_use]
    pub fn failing(error: PublishError) -> Self {
        Self::builder().otherwise(PublishOutcome::Fail(error)).build()
    }

    /// Leave every publication outstanding.
    #[must_use]
    pub fn holding() -> Self {
        Self::builder().otherwise(PublishOutcome::Hold).build()
    }

    /// All publications so far, in call order.
    #[must_use]
    pub fn records(&self) -> Vec<PublishRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// Number of `publish` calls so far.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        *self.published_tx.borrow()
    }

    /// Wait until at least `count` publications have been made.
    pub async fn wait_for_publishes(&self, count: usize) {
        let mut published_rx = self.published_tx.subscribe();
        // The sender lives as long as `self`
        let _ = published_rx.wait_for(|published| *published >= count).await;
    }

    /// Whether the held publication at `index` has been cancelled.
    ///
    /// `None` if the publication was not held or was already completed.
    #[must_use]
    pub fn is_cancelled(&self, index: usize) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .held
            .get(&index)
            .map(PublishCompleter::is_cancelled)
    }

    /// Indices of held publications that were cancelled.
    #[must_use]
    pub fn cancelled_indices(&self) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        let mut cancelled: Vec<usize> = state
            .held
            .iter()
            .filter(|(_, completer)| completer.is_cancelled())
            .map(|(index, _)| *index)
            .collect();
        cancelled.sort_unstable();
        cancelled
    }

    /// Complete the held publication at `index`.
    ///
    /// Returns `false` if nothing is held at `index` or the manager already
    /// cancelled it.
    pub fn complete(&self, index: usize, outcome: Result<(), PublishError>) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(completer) = state.held.remove(&index) else {
            return false;
        };

        let accepted = outcome.is_ok();
        let delivered = completer.complete(outcome);
        if delivered && accepted {
            if let Some(record) = state.records.get(index) {
                let key_id = record.key_id.clone();
                state.trusted.insert(key_id);
            }
        }
        delivered
    }

    /// Whether the server has accepted `key_id`.
    #[must_use]
    pub fn is_trusted(&self, key_id: &str) -> bool {
        self.state.lock().unwrap().trusted.contains(key_id)
    }

    fn next_outcome(&self) -> PublishOutcome {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

impl KeyServerClient for MockKeyServer {
    fn publish(&self, public_key: PublicKey, signer: Arc<SigningKey>) -> PublishOperation {
        let outcome = self.next_outcome();

        let signing_input = public_key.signing_input().unwrap();
        let signature = signer.sign(&signing_input);
        let signature_valid = signer.public_key().verify(&signing_input, &signature);
        let self_signed = signer.key_id() == public_key.kid;

        let (operation, completer) = PublishOperation::new();

        let mut state = self.state.lock().unwrap();
        let index = state.records.len();
        let signer_trusted = self_signed || state.trusted.contains(signer.key_id());
        let mut live_at_submit: Vec<usize> = state
            .held
            .iter()
            .filter(|(_, completer)| !completer.is_cancelled())
            .map(|(index, _)| *index)
            .collect();
        live_at_submit.sort_unstable();

        state.records.push(PublishRecord {
            index,
            key_id: public_key.kid.clone(),
            signer_key_id: signer.key_id().to_string(),
            self_signed,
            signature_valid,
            signer_trusted,
            live_at_submit,
            outcome: outcome.clone(),
        });

        match outcome {
            PublishOutcome::Succeed => {
                state.trusted.insert(public_key.kid);
                completer.complete(Ok(()));
            }
            PublishOutcome::Fail(error) => {
                completer.complete(Err(error));
            }
            PublishOutcome::Hold => {
                state.held.insert(index, completer);
            }
            PublishOutcome::Abandon => drop(completer),
        }
        drop(state);

        self.published_tx.send_modify(|published| *published += 1);
        operation
    }
}

/// Builder for MockKeyServer configuration.
#[derive(Debug, Default)]
pub struct MockKeyServerBuilder {
    script: VecDeque<PublishOutcome>,
    default_outcome: Option<PublishOutcome>,
}

impl MockKeyServerBuilder {
    /// Answer the next unscripted publication with `outcome`.
    #[must_use]
    pub fn then(mut self, outcome: PublishOutcome) -> Self {
        self.script.push_back(outcome);
        self
    }

    /// Answer publications beyond the script with `outcome` (default: succeed).
    #[must_use]
    pub fn otherwise(mut self, outcome: PublishOutcome) -> Self {
        self.default_outcome = Some(outcome);
        self
    }

    /// Build the MockKeyServer.
    #[must_use]
    pub fn build(self) -> MockKeyServer {
        let (published_tx, _) = watch::channel(0);
        MockKeyServer {
            script: Mutex::new(self.script),
            default_outcome: self.default_outcome.unwrap_or(PublishOutcome::Succeed),
            state: Mutex::new(MockState::default()),
            published_tx,
        }
    }
}
