//! Key server client seam.
//!
//! The wire protocol to the trust-distribution service lives outside this
//! crate. Implementations sign the publication with `signer` (see
//! [`PublicKey::signing_input`]), start the network work on their own task,
//! and report through the [`PublishCompleter`](crate::publish::PublishCompleter)
//! half of the returned operation.

use crate::crypto::{PublicKey, SigningKey};
use crate::publish::PublishOperation;
use std::sync::Arc;

/// Publishes public keys to a key server.
pub trait KeyServerClient: Send + Sync {
    /// Begin publishing `public_key`, vouched for by `signer`.
    ///
    /// Must return immediately: the rotation loop calls this while holding
    /// the key lock. Completion is observed through the returned operation.
    /// When `signer` holds the same key as `public_key` the publication is
    /// self-signed (bootstrap).
    fn publish(&self, public_key: PublicKey, signer: Arc<SigningKey>) -> PublishOperation;
}
