//! Signing key lifecycle management.
//!
//! Generates Ed25519 signing keys, publishes their public half to a
//! trust-distribution key server, rotates them on a schedule and serves the
//! currently valid key to token signers.
//!
//! # Modules
//!
//! - `config` - Rotation settings (issuer, interval, key server, retry policy)
//! - `crypto` - Signing keys, JWK export, key generation seam
//! - `errors` - Error types
//! - `key_server` - Key server client seam
//! - `manager` - Key lifecycle manager, rotation handle, builder
//! - `observability` - Metrics
//! - `publish` - Cancellable publish operations
//! - `rotation` - Background rotation state machine
//!
//! A key only becomes Active after its publish succeeds. Until then
//! [`KeyLifecycleManager::active_key`] returns [`KeyError::NoActiveKey`].

#![warn(clippy::pedantic)]

pub mod config;
pub mod crypto;
pub mod errors;
pub mod key_server;
pub mod manager;
pub mod observability;
pub mod publish;
pub mod rotation;

pub use config::{KeyServerConfig, RotationConfig};
pub use crypto::{Ed25519KeyGenerator, KeyGenerator, PublicKey, SigningKey};
pub use errors::{KeyError, PublishError};
pub use key_server::KeyServerClient;
pub use manager::{spawn_key_manager, KeyLifecycleManager, KeyManagerBuilder, RotationHandle};
pub use publish::{PublishCompleter, PublishOperation};
pub use rotation::{exit_process_on_fatal, FatalHandler, RotationState, RotationStatus};
