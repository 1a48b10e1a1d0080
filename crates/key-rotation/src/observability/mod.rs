//! Observability for the key rotation core.
//!
//! Logging uses `tracing` with explicit `target:` values. Key ids are safe
//! to log; key material never is. Metrics are recorded through the
//! `metrics` facade so the embedding service picks the exporter.

pub mod metrics;
