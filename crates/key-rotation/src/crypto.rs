//! Signing key material.
//!
//! Keys are Ed25519 pairs generated with ring's CSPRNG. The private half is
//! held as a PKCS#8 document inside a [`SecretBox`] so it is zeroized on
//! drop and never appears in `Debug` output. The public half is exported as
//! an RFC 8037 OKP JSON Web Key, identified by its RFC 7638 thumbprint.

use crate::errors::KeyError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519},
};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::instrument;

/// JWK key type for Edwards-curve keys.
pub const JWK_KEY_TYPE: &str = "OKP";

/// JWK curve name.
pub const JWK_CURVE: &str = "Ed25519";

/// JWS algorithm for Ed25519 signatures.
pub const JWK_ALGORITHM: &str = "EdDSA";

/// An asymmetric key pair plus its stable identifier.
///
/// Shared as `Arc<SigningKey>` between the manager (Active/Pending slots),
/// key-server clients (as the publication signer) and token signers.
pub struct SigningKey {
    key_id: String,
    key_pair: Ed25519KeyPair,
    pkcs8: SecretBox<Vec<u8>>,
    created_at: DateTime<Utc>,
}

impl SigningKey {
    /// Generate a fresh key from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Crypto` if the CSPRNG or key parsing fails.
    #[instrument(skip_all)]
    pub fn generate() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();

        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| KeyError::Crypto(format!("Keypair generation failed: {e}")))?;

        Self::from_pkcs8(pkcs8.as_ref())
    }

    /// Load a key from an Ed25519 PKCS#8 (v1 or v2) document.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Crypto` if the document is not a valid Ed25519 key.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, KeyError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8)
            .map_err(|e| KeyError::Crypto(format!("Keypair parsing failed: {e}")))?;

        let x = URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref());
        let key_id = jwk_thumbprint(&x);

        Ok(Self {
            key_id,
            key_pair,
            pkcs8: SecretBox::new(Box::new(pkcs8.to_vec())),
            created_at: Utc::now(),
        })
    }

    /// Stable identifier (RFC 7638 JWK thumbprint of the public key).
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// When this key was generated or loaded.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Derive the publishable public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.key_id.clone(),
            kty: JWK_KEY_TYPE.to_string(),
            crv: JWK_CURVE.to_string(),
            x: URL_SAFE_NO_PAD.encode(self.key_pair.public_key().as_ref()),
            use_: "sig".to_string(),
            alg: JWK_ALGORITHM.to_string(),
        }
    }

    /// Sign arbitrary bytes (e.g. a key publication) with this key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }

    /// Encoding key for signing JWTs with `Algorithm::EdDSA`.
    ///
    /// Tokens signed with it should carry `kid = key_id()` in their header.
    #[must_use]
    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(self.pkcs8.expose_secret())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("private_key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Public half of a signing key as a JSON Web Key (RFC 7517, RFC 8037).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub kid: String, // Key ID (thumbprint)
    pub kty: String, // Key Type ("OKP")
    pub crv: String, // Curve ("Ed25519")
    pub x: String,   // Public key (base64url, no padding)
    #[serde(rename = "use")]
    pub use_: String, // Public key use ("sig")
    pub alg: String, // Algorithm ("EdDSA")
}

impl PublicKey {
    /// Bytes a signer signs when vouching for this key.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Crypto` if the key cannot be serialized.
    pub fn signing_input(&self) -> Result<Vec<u8>, KeyError> {
        serde_json::to_vec(self)
            .map_err(|e| KeyError::Crypto(format!("Public key serialization failed: {e}")))
    }

    /// Verify an Ed25519 signature made by the matching private key.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(public_key_bytes) = URL_SAFE_NO_PAD.decode(&self.x) else {
            tracing::debug!(target: "key_rotation.crypto", kid = %self.kid, "Invalid public key encoding");
            return false;
        };

        UnparsedPublicKey::new(&ED25519, public_key_bytes)
            .verify(message, signature)
            .is_ok()
    }

    /// Decoding key for verifying JWTs signed by the matching private key.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Crypto` if `x` is not valid base64url.
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        DecodingKey::from_ed_components(&self.x)
            .map_err(|e| KeyError::Crypto(format!("Invalid public key: {e}")))
    }

    /// Recompute the RFC 7638 thumbprint from the key material.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        jwk_thumbprint(&self.x)
    }
}

/// RFC 7638 thumbprint of an Ed25519 OKP key.
///
/// Members are the required ones (`crv`, `kty`, `x`) in lexicographic order
/// with no whitespace.
fn jwk_thumbprint(x: &str) -> String {
    let canonical = format!(r#"{{"crv":"{JWK_CURVE}","kty":"{JWK_KEY_TYPE}","x":"{x}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// Source of fresh signing keys.
///
/// Generation can fail (entropy or resource exhaustion); the rotation loop
/// reports that as a failed publish rather than a separate error channel.
pub trait KeyGenerator: Send + Sync {
    /// Produce a new key pair.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Crypto` when no key could be produced.
    fn generate(&self) -> Result<SigningKey, KeyError>;
}

/// Production generator backed by [`SigningKey::generate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519KeyGenerator;

impl KeyGenerator for Ed25519KeyGenerator {
    fn generate(&self) -> Result<SigningKey, KeyError> {
        SigningKey::generate()
    }
}
