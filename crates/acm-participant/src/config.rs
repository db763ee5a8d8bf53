// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Participant configuration.

use std::env;
use std::time::Duration;

use acm_protocol::model::{ReplicaKey, SupportedElementType};
use uuid::Uuid;

use crate::error::{ParticipantError, Result};

/// Participant process configuration.
#[derive(Clone)]
pub struct ParticipantConfig {
    /// Participant ID (required), shared by all replicas
    pub participant_id: Uuid,
    /// Replica ID (default: random)
    pub replica_id: Uuid,
    /// Status report period (default: 20s)
    pub heartbeat_interval: Duration,
    /// Element types this participant can run
    pub supported_element_types: Vec<SupportedElementType>,
    /// Pass phrase for decrypting sensitive properties before they reach
    /// the listener. Unset means values are passed through as received.
    pub encryption_pass_phrase: Option<String>,
}

impl std::fmt::Debug for ParticipantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantConfig")
            .field("participant_id", &self.participant_id)
            .field("replica_id", &self.replica_id)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("supported_element_types", &self.supported_element_types)
            .field(
                "encryption_pass_phrase",
                &self.encryption_pass_phrase.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl ParticipantConfig {
    /// Load configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `ACM_PARTICIPANT_ID` - Participant UUID
    ///
    /// # Optional Environment Variables
    /// - `ACM_REPLICA_ID` - Replica UUID (default: random)
    /// - `ACM_HEARTBEAT_INTERVAL_MS` - Status report period (default: 20000)
    /// - `ACM_SUPPORTED_ELEMENT_TYPES` - Comma separated `type:version` list
    /// - `ACM_ENCRYPTION_PASS_PHRASE` - Decrypt sensitive properties
    pub fn from_env() -> Result<Self> {
        let participant_id = env::var("ACM_PARTICIPANT_ID")
            .map_err(|_| ParticipantError::Config("ACM_PARTICIPANT_ID is required".to_string()))?
            .parse()
            .map_err(|e| ParticipantError::Config(format!("invalid ACM_PARTICIPANT_ID: {}", e)))?;

        let replica_id = match env::var("ACM_REPLICA_ID") {
            Ok(v) => v
                .parse()
                .map_err(|e| ParticipantError::Config(format!("invalid ACM_REPLICA_ID: {}", e)))?,
            Err(_) => Uuid::new_v4(),
        };

        let heartbeat_interval_ms: u64 = env::var("ACM_HEARTBEAT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20_000);

        let supported_element_types = match env::var("ACM_SUPPORTED_ELEMENT_TYPES") {
            Ok(v) => parse_element_types(&v)?,
            Err(_) => Vec::new(),
        };

        let encryption_pass_phrase = env::var("ACM_ENCRYPTION_PASS_PHRASE")
            .ok()
            .filter(|p| !p.is_empty());

        Ok(Self {
            participant_id,
            replica_id,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            supported_element_types,
            encryption_pass_phrase,
        })
    }

    /// Configuration for a fresh replica of `participant_id`.
    pub fn new(participant_id: Uuid, supported_element_types: Vec<SupportedElementType>) -> Self {
        Self {
            participant_id,
            replica_id: Uuid::new_v4(),
            heartbeat_interval: Duration::from_secs(20),
            supported_element_types,
            encryption_pass_phrase: None,
        }
    }

    pub fn with_replica_id(mut self, replica_id: Uuid) -> Self {
        self.replica_id = replica_id;
        self
    }

    /// Set the heartbeat period. Zero disables heartbeats.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_encryption_pass_phrase(mut self, pass_phrase: impl Into<String>) -> Self {
        self.encryption_pass_phrase = Some(pass_phrase.into());
        self
    }

    pub fn key(&self) -> ReplicaKey {
        ReplicaKey::new(self.participant_id, self.replica_id)
    }
}

/// Parse `type:version[,type:version...]`. The version is everything after
/// the last colon.
fn parse_element_types(value: &str) -> Result<Vec<SupportedElementType>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .rsplit_once(':')
                .filter(|(name, version)| !name.is_empty() && !version.is_empty())
                .map(|(name, version)| SupportedElementType::new(name, version))
                .ok_or_else(|| {
                    ParticipantError::Config(format!(
                        "invalid ACM_SUPPORTED_ELEMENT_TYPES entry '{}', expected type:version",
                        entry
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 5] = [
        "ACM_PARTICIPANT_ID",
        "ACM_REPLICA_ID",
        "ACM_HEARTBEAT_INTERVAL_MS",
        "ACM_SUPPORTED_ELEMENT_TYPES",
        "ACM_ENCRYPTION_PASS_PHRASE",
    ];

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in VARS {
                let old = env::var(var).ok();
                guard.vars.push((var.to_string(), old));
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe { env::remove_var(var) };
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..) {
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
    fn test_participant_id_is_required() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = ParticipantConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("ACM_PARTICIPANT_ID is required"));
    }

    #[test]
    fn test_from_env_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        let participant_id = Uuid::new_v4();
        guard.set("ACM_PARTICIPANT_ID", &participant_id.to_string());

        let config = ParticipantConfig::from_env().unwrap();
        assert_eq!(config.participant_id, participant_id);
        assert_ne!(config.replica_id, Uuid::nil());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
        assert!(config.supported_element_types.is_empty());
        assert!(config.encryption_pass_phrase.is_none());
    }

    #[test]
    fn test_from_env_element_types() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();
        guard.set("ACM_PARTICIPANT_ID", &Uuid::new_v4().to_string());
        guard.set(
            "ACM_SUPPORTED_ELEMENT_TYPES",
            "org.acm.HttpElement:1.0.0, org.acm.K8sElement:2.1.0",
        );

        let config = ParticipantConfig::from_env().unwrap();
        assert_eq!(
            config.supported_element_types,
            vec![
                SupportedElementType::new("org.acm.HttpElement", "1.0.0"),
                SupportedElementType::new("org.acm.K8sElement", "2.1.0"),
            ]
        );

        guard.set("ACM_SUPPORTED_ELEMENT_TYPES", "org.acm.HttpElement");
        assert!(ParticipantConfig::from_env().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let replica_id = Uuid::new_v4();
        let config = ParticipantConfig::new(Uuid::new_v4(), Vec::new())
            .with_replica_id(replica_id)
            .with_heartbeat_interval(Duration::from_millis(500))
            .with_encryption_pass_phrase("s3cret");

        assert_eq!(config.replica_id, replica_id);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert!(!format!("{:?}", config).contains("s3cret"));
    }
}
