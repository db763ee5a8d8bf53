// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Participant-specific error types.

use acm_protocol::{BusError, EncryptionError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in a participant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParticipantError {
    /// Configuration error (missing or invalid environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Publishing or subscribing failed
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// A sensitive value could not be decrypted
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// Element info reported for an element this replica does not hold
    #[error("element {element_id} of instance {instance_id} is not held by this replica")]
    UnknownElement {
        /// Instance the element was reported for
        instance_id: Uuid,
        /// Reported element
        element_id: Uuid,
    },

    /// The element listener rejected an operation
    #[error("{operation} failed: {message}")]
    Listener {
        /// Listener operation
        operation: &'static str,
        /// Reason given by the listener
        message: String,
    },
}

impl ParticipantError {
    /// Listener failure for `operation`.
    pub fn listener(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Listener {
            operation,
            message: message.into(),
        }
    }
}

/// Result type for participant operations.
pub type Result<T> = std::result::Result<T, ParticipantError>;
