//! Deterministic key fixtures and key generators for testing.
//!
//! Seeded keys let tests predict key ids: the first key a
//! [`SeededKeyGenerator`] hands out is `test_signing_key(1)`, the second
//! `test_signing_key(2)`, and so on.

use key_rotation::{KeyError, KeyGenerator, SigningKey};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Deterministic Ed25519 signing key for `seed`.
///
/// The same seed always produces the same key (and key id).
pub fn test_signing_key(seed: u8) -> Result<SigningKey, FixtureError> {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    SigningKey::from_pkcs8(&build_pkcs8_from_seed(&seed_bytes))
        .map_err(|e| FixtureError::Crypto(format!("Failed to load test keypair: {e}")))
}

/// Build a PKCS#8 v1 document from an Ed25519 seed.
///
/// Test-only: production keys come from the system CSPRNG.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { version INTEGER 0, AlgorithmIdentifier { OID 1.3.101.112 },
    //            privateKey OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}

/// Hands out `test_signing_key(1)`, `test_signing_key(2)`, ... in order.
#[derive(Debug)]
pub struct SeededKeyGenerator {
    next_seed: AtomicU8,
}

impl SeededKeyGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    #[must_use]
    pub fn starting_at(seed: u8) -> Self {
        Self {
            next_seed: AtomicU8::new(seed),
        }
    }
}

impl Default for SeededKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for SeededKeyGenerator {
    fn generate(&self) -> Result<SigningKey, KeyError> {
        let seed = self.next_seed.fetch_add(1, Ordering::SeqCst);
        test_signing_key(seed).map_err(|e| KeyError::Crypto(e.to_string()))
    }
}

/// Fails the first `failures` generations, then produces seeded keys.
#[derive(Debug)]
pub struct FailingKeyGenerator {
    failures_remaining: AtomicU32,
    fallback: SeededKeyGenerator,
}

impl FailingKeyGenerator {
    /// Fail every generation.
    #[must_use]
    pub fn always() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Fail the first `failures` generations.
    #[must_use]
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            fallback: SeededKeyGenerator::new(),
        }
    }
}

impl KeyGenerator for FailingKeyGenerator {
    fn generate(&self) -> Result<SigningKey, KeyError> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();

        if failing {
            return Err(KeyError::Crypto("entropy source exhausted".to_string()));
        }
        self.fallback.generate()
    }
}
