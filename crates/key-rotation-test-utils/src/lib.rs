//! # Key Rotation Test Utilities
//!
//! Shared test utilities for the `key-rotation` crate.
//!
//! This crate provides:
//! - An in-memory key server with scripted outcomes (`MockKeyServer`)
//! - Deterministic key fixtures and key generators
//! - A recorder standing in for the fail-stop handler (`FatalRecorder`)
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use key_rotation::{KeyManagerBuilder, RotationConfig};
//! use key_rotation_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let server = Arc::new(MockKeyServer::succeeding());
//!     let fatal = FatalRecorder::new();
//!
//!     let (handle, manager) = KeyManagerBuilder::new(config, server.clone())
//!         .with_key_generator(Arc::new(SeededKeyGenerator::new()))
//!         .with_fatal_handler(fatal.handler())
//!         .spawn();
//! }
//! ```

pub mod crypto_fixtures;
pub mod fatal;
pub mod logging;
pub mod mock_key_server;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use fatal::*;
pub use logging::*;
pub use mock_key_server::*;
