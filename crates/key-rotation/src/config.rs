//! Rotation settings, loaded from the environment or built in code.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default rotation interval (12 hours).
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Longest rotation interval accepted from the environment (one year).
pub const MAX_ROTATION_INTERVAL_SECS: i64 = 365 * 24 * 60 * 60;

/// Default number of publish attempts before the failure is fatal.
///
/// One attempt means the first failure is fatal.
pub const DEFAULT_MAX_PUBLISH_ATTEMPTS: u32 = 1;

/// Key server endpoint settings.
///
/// Opaque to the rotation core; passed through to whatever builds the
/// [`KeyServerClient`](crate::key_server::KeyServerClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyServerConfig {
    pub endpoint: String,
}

/// Settings for the key lifecycle manager. Immutable once the manager is
/// spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// Issuer identity the keys sign for.
    pub issuer: String,
    /// Period between rotations. `None` disables periodic rotation; the
    /// bootstrap publish still happens exactly once.
    pub rotation_interval: Option<Duration>,
    pub key_server: KeyServerConfig,
    /// Consecutive failed publishes tolerated before escalating.
    pub max_publish_attempts: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl RotationConfig {
    /// Create a configuration with the default interval and fail-stop policy.
    #[must_use]
    pub fn new(issuer: impl Into<String>, key_server: KeyServerConfig) -> Self {
        Self {
            issuer: issuer.into(),
            rotation_interval: Some(DEFAULT_ROTATION_INTERVAL),
            key_server,
            max_publish_attempts: DEFAULT_MAX_PUBLISH_ATTEMPTS,
        }
    }

    /// Set the rotation interval. A zero interval disables rotation.
    #[must_use]
    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Set the rotation interval in seconds. Non-positive disables rotation.
    #[must_use]
    pub fn with_rotation_interval_secs(mut self, secs: i64) -> Self {
        self.rotation_interval = interval_from_secs(secs);
        self
    }

    /// Disable periodic rotation.
    #[must_use]
    pub fn without_rotation(mut self) -> Self {
        self.rotation_interval = None;
        self
    }

    /// Tolerate up to `attempts` consecutive publish failures (minimum 1).
    #[must_use]
    pub fn with_max_publish_attempts(mut self, attempts: u32) -> Self {
        self.max_publish_attempts = attempts.max(1);
        self
    }

    /// Whether periodic rotation is enabled.
    #[must_use]
    pub fn rotation_enabled(&self) -> bool {
        self.rotation_interval.is_some_and(|period| !period.is_zero())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer = vars
            .get("KEY_ROTATION_ISSUER")
            .ok_or_else(|| ConfigError::MissingEnvVar("KEY_ROTATION_ISSUER".to_string()))?
            .clone();

        let endpoint = vars
            .get("KEY_SERVER_ENDPOINT")
            .ok_or_else(|| ConfigError::MissingEnvVar("KEY_SERVER_ENDPOINT".to_string()))?
            .clone();

        let rotation_interval = match vars.get("KEY_ROTATION_INTERVAL_SECS") {
            Some(raw) => {
                let secs: i64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    name: "KEY_ROTATION_INTERVAL_SECS".to_string(),
                    reason: format!("{e}"),
                })?;
                if secs > MAX_ROTATION_INTERVAL_SECS {
                    return Err(ConfigError::InvalidValue {
                        name: "KEY_ROTATION_INTERVAL_SECS".to_string(),
                        reason: format!("must be at most {MAX_ROTATION_INTERVAL_SECS} seconds"),
                    });
                }
                interval_from_secs(secs)
            }
            None => Some(DEFAULT_ROTATION_INTERVAL),
        };

        let max_publish_attempts = match vars.get("KEY_PUBLISH_MAX_ATTEMPTS") {
            Some(raw) => {
                let attempts: u32 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    name: "KEY_PUBLISH_MAX_ATTEMPTS".to_string(),
                    reason: format!("{e}"),
                })?;
                if attempts == 0 {
                    return Err(ConfigError::InvalidValue {
                        name: "KEY_PUBLISH_MAX_ATTEMPTS".to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                attempts
            }
            None => DEFAULT_MAX_PUBLISH_ATTEMPTS,
        };

        Ok(RotationConfig {
            issuer,
            rotation_interval,
            key_server: KeyServerConfig { endpoint },
            max_publish_attempts,
        })
    }
}

fn interval_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
