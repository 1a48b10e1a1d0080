//! Error types for the key rotation core.

use thiserror::Error;

/// Errors surfaced to callers of the key lifecycle manager.
#[derive(Debug, Error)]
pub enum KeyError {
    /// No publish has succeeded yet, so there is no key to sign with.
    ///
    /// Expected during bootstrap; callers should retry or fail the request.
    #[error("No key is yet active")]
    NoActiveKey,

    /// Key generation or parsing failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The rotation loop exited before a key became active.
    #[error("Key rotation has stopped")]
    RotationStopped,

    /// The rotation task could not be joined (panicked or was aborted).
    #[error("Rotation task failed: {0}")]
    Task(String),
}

/// Terminal failure reported by a publish operation.
///
/// Every variant is treated the same way by the rotation loop: the attempt
/// failed and no successor key is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// A fresh key could not be generated for the attempt.
    #[error("Unable to generate new key: {0}")]
    KeyGeneration(String),

    /// The key server refused the publication.
    #[error("Key server rejected publication: {0}")]
    Rejected(String),

    /// The key server could not be reached.
    #[error("Key server unavailable: {0}")]
    Unavailable(String),

    /// The client dropped the operation without reporting an outcome.
    #[error("Publish operation abandoned before completion")]
    Abandoned,
}
