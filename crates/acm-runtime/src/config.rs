// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Runtime coordinator configuration
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Budget for collecting acks of one fan-out command
    pub command_timeout: Duration,
    /// How often participant health is checked
    pub supervision_interval: Duration,
    /// Heartbeat silence before a participant is NOT_HEALTHY
    pub participant_timeout: Duration,
    /// Whether sensitive properties are encrypted
    pub encryption_enabled: bool,
    /// Pass phrase the encryption key is derived from
    pub encryption_pass_phrase: Option<String>,
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("command_timeout", &self.command_timeout)
            .field("supervision_interval", &self.supervision_interval)
            .field("participant_timeout", &self.participant_timeout)
            .field("encryption_enabled", &self.encryption_enabled)
            .field(
                "encryption_pass_phrase",
                &self.encryption_pass_phrase.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(30_000),
            supervision_interval: Duration::from_millis(10_000),
            participant_timeout: Duration::from_millis(60_000),
            encryption_enabled: false,
            encryption_pass_phrase: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `ACM_COMMAND_TIMEOUT_MS`: ack collection budget (default: 30000)
    /// - `ACM_SUPERVISION_INTERVAL_MS`: participant health check period (default: 10000)
    /// - `ACM_PARTICIPANT_TIMEOUT_MS`: heartbeat silence before NOT_HEALTHY (default: 60000)
    /// - `ACM_ENCRYPTION_ENABLED`: `true` or `false` (default: false)
    ///
    /// Required when encryption is enabled:
    /// - `ACM_ENCRYPTION_PASS_PHRASE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let command_timeout = millis_var("ACM_COMMAND_TIMEOUT_MS", "30000")?;
        let supervision_interval = millis_var("ACM_SUPERVISION_INTERVAL_MS", "10000")?;
        let participant_timeout = millis_var("ACM_PARTICIPANT_TIMEOUT_MS", "60000")?;

        let encryption_enabled: bool = std::env::var("ACM_ENCRYPTION_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("ACM_ENCRYPTION_ENABLED", "must be true or false"))?;

        let encryption_pass_phrase = std::env::var("ACM_ENCRYPTION_PASS_PHRASE")
            .ok()
            .filter(|p| !p.is_empty());
        if encryption_enabled && encryption_pass_phrase.is_none() {
            return Err(ConfigError::Missing("ACM_ENCRYPTION_PASS_PHRASE"));
        }

        Ok(Self {
            command_timeout,
            supervision_interval,
            participant_timeout,
            encryption_enabled,
            encryption_pass_phrase,
        })
    }
}

fn millis_var(name: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a number of milliseconds"))?;
    if millis == 0 {
        return Err(ConfigError::Invalid(name, "must be greater than zero"));
    }
    Ok(Duration::from_millis(millis))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 5] = [
        "ACM_COMMAND_TIMEOUT_MS",
        "ACM_SUPERVISION_INTERVAL_MS",
        "ACM_PARTICIPANT_TIMEOUT_MS",
        "ACM_ENCRYPTION_ENABLED",
        "ACM_ENCRYPTION_PASS_PHRASE",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let config = RuntimeConfig::from_env().unwrap();

        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.supervision_interval, Duration::from_secs(10));
        assert_eq!(config.participant_timeout, Duration::from_secs(60));
        assert!(!config.encryption_enabled);
        assert!(config.encryption_pass_phrase.is_none());
    }

    #[test]
    fn test_config_custom_timeouts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("ACM_COMMAND_TIMEOUT_MS", "1500");
        guard.set("ACM_PARTICIPANT_TIMEOUT_MS", "250");

        let config = RuntimeConfig::from_env().unwrap();

        assert_eq!(config.command_timeout, Duration::from_millis(1500));
        assert_eq!(config.participant_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_config_invalid_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("ACM_COMMAND_TIMEOUT_MS", "soon");
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("ACM_COMMAND_TIMEOUT_MS", _)));

        guard.set("ACM_COMMAND_TIMEOUT_MS", "0");
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("ACM_COMMAND_TIMEOUT_MS", _)));
    }

    #[test]
    fn test_config_encryption_requires_pass_phrase() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("ACM_ENCRYPTION_ENABLED", "true");
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ACM_ENCRYPTION_PASS_PHRASE")));

        guard.set("ACM_ENCRYPTION_PASS_PHRASE", "s3cret");
        let config = RuntimeConfig::from_env().unwrap();
        assert!(config.encryption_enabled);
        assert_eq!(config.encryption_pass_phrase.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_config_debug_hides_pass_phrase() {
        let config = RuntimeConfig {
            encryption_pass_phrase: Some("s3cret".to_string()),
            ..RuntimeConfig::default()
        };
        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("RuntimeConfig"));
        assert!(!debug_str.contains("s3cret"));
    }
}
