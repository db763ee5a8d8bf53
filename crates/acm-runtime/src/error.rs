// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for acm-runtime.
//!
//! Every variant carries a stable error code so callers sitting behind an
//! API surface can map failures without matching on messages.

use std::fmt;

use acm_protocol::{BusError, EncryptionError};
use uuid::Uuid;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by coordinator entry points.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Composition instance does not exist.
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: Uuid,
    },

    /// Composition instance id is already taken.
    InstanceAlreadyExists {
        /// The duplicate instance ID.
        instance_id: Uuid,
    },

    /// Composition definition does not exist.
    DefinitionNotFound {
        /// The composition ID that was not found.
        composition_id: Uuid,
    },

    /// Definition must be primed for the requested operation.
    DefinitionNotPrimed {
        /// The composition ID.
        composition_id: Uuid,
        /// Its current state.
        state: String,
    },

    /// Definition is still referenced by instances.
    DefinitionInUse {
        /// The composition ID.
        composition_id: Uuid,
        /// Number of instances referencing it.
        instances: usize,
    },

    /// No registered replica for the participant.
    ParticipantNotFound {
        /// The participant ID.
        participant_id: Uuid,
    },

    /// Requested transition is not allowed from the current state.
    InvalidStateTransition {
        /// The instance ID.
        instance_id: Uuid,
        /// Current state.
        from: String,
        /// Requested target.
        to: String,
    },

    /// Another command on the same instance or definition has not finished.
    CommandInProgress {
        /// The instance or composition ID.
        target_id: Uuid,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Encrypting or decrypting sensitive properties failed.
    EncryptionError {
        /// Error details.
        details: String,
    },

    /// Publishing to the bus failed.
    BusError {
        /// Error details.
        details: String,
    },

    /// Persistence provider failed.
    PersistenceError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl RuntimeError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::InstanceAlreadyExists { .. } => "INSTANCE_ALREADY_EXISTS",
            Self::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            Self::DefinitionNotPrimed { .. } => "DEFINITION_NOT_PRIMED",
            Self::DefinitionInUse { .. } => "DEFINITION_IN_USE",
            Self::ParticipantNotFound { .. } => "PARTICIPANT_NOT_FOUND",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::CommandInProgress { .. } => "COMMAND_IN_PROGRESS",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::EncryptionError { .. } => "ENCRYPTION_ERROR",
            Self::BusError { .. } => "BUS_ERROR",
            Self::PersistenceError { .. } => "PERSISTENCE_ERROR",
        }
    }

    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn persistence(operation: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::PersistenceError {
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstanceNotFound { instance_id } => {
                write!(f, "Automation composition '{}' not found", instance_id)
            }
            Self::InstanceAlreadyExists { instance_id } => {
                write!(f, "Automation composition '{}' already exists", instance_id)
            }
            Self::DefinitionNotFound { composition_id } => {
                write!(f, "Composition definition '{}' not found", composition_id)
            }
            Self::DefinitionNotPrimed {
                composition_id,
                state,
            } => {
                write!(
                    f,
                    "Composition definition '{}' is {}, expected PRIMED",
                    composition_id, state
                )
            }
            Self::DefinitionInUse {
                composition_id,
                instances,
            } => {
                write!(
                    f,
                    "Composition definition '{}' is used by {} instance(s)",
                    composition_id, instances
                )
            }
            Self::ParticipantNotFound { participant_id } => {
                write!(f, "No registered replica for participant '{}'", participant_id)
            }
            Self::InvalidStateTransition {
                instance_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "Automation composition '{}' cannot move from {} to {}",
                    instance_id, from, to
                )
            }
            Self::CommandInProgress { target_id } => {
                write!(f, "A command on '{}' is still in progress", target_id)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::EncryptionError { details } => {
                write!(f, "Encryption error: {}", details)
            }
            Self::BusError { details } => {
                write!(f, "Message bus error: {}", details)
            }
            Self::PersistenceError { operation, details } => {
                write!(f, "Persistence error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<BusError> for RuntimeError {
    fn from(err: BusError) -> Self {
        Self::BusError {
            details: err.to_string(),
        }
    }
}

impl From<EncryptionError> for RuntimeError {
    fn from(err: EncryptionError) -> Self {
        Self::EncryptionError {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = Uuid::nil();
        assert_eq!(
            RuntimeError::InstanceNotFound { instance_id: id }.error_code(),
            "INSTANCE_NOT_FOUND"
        );
        assert_eq!(
            RuntimeError::CommandInProgress { target_id: id }.error_code(),
            "COMMAND_IN_PROGRESS"
        );
        assert_eq!(
            RuntimeError::validation("elements", "empty").error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            RuntimeError::persistence("save_instance", "disk full").error_code(),
            "PERSISTENCE_ERROR"
        );
    }

    #[test]
    fn test_display_names_the_target() {
        let id = Uuid::new_v4();
        let err = RuntimeError::InvalidStateTransition {
            instance_id: id,
            from: "RUNNING".to_string(),
            to: "UNINITIALISED".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("RUNNING"));
        assert!(msg.contains("UNINITIALISED"));
    }

    #[test]
    fn test_decrypt_failure_keeps_field_name() {
        let err: RuntimeError = EncryptionError::Decrypt {
            field: "credentials.password".to_string(),
            reason: "authentication failed".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "ENCRYPTION_ERROR");
        assert!(err.to_string().contains("credentials.password"));
    }
}
