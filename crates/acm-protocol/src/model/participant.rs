// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Participant replicas as tracked by the runtime.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::definition::ConceptId;
use super::state::{HealthStatus, ParticipantState};

/// Identity of one running instance of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaKey {
    pub participant_id: Uuid,
    pub replica_id: Uuid,
}

impl ReplicaKey {
    pub fn new(participant_id: Uuid, replica_id: Uuid) -> Self {
        Self {
            participant_id,
            replica_id,
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.participant_id, self.replica_id)
    }
}

/// Element type a participant can host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedElementType {
    pub type_name: String,
    pub type_version: String,
}

impl SupportedElementType {
    pub fn new(type_name: impl Into<String>, type_version: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            type_version: type_version.into(),
        }
    }

    pub fn matches(&self, element_type: &ConceptId) -> bool {
        self.type_name == element_type.name && self.type_version == element_type.version
    }
}

/// Registered participant replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: Uuid,
    pub replica_id: Uuid,
    pub state: ParticipantState,
    pub health: HealthStatus,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub supported_element_types: Vec<SupportedElementType>,
}

impl Participant {
    pub fn new(key: ReplicaKey, supported_element_types: Vec<SupportedElementType>) -> Self {
        Self {
            participant_id: key.participant_id,
            replica_id: key.replica_id,
            state: ParticipantState::Unknown,
            health: HealthStatus::Unknown,
            last_heartbeat: Utc::now(),
            supported_element_types,
        }
    }

    pub fn key(&self) -> ReplicaKey {
        ReplicaKey::new(self.participant_id, self.replica_id)
    }

    pub fn supports(&self, element_type: &ConceptId) -> bool {
        self.supported_element_types
            .iter()
            .any(|t| t.matches(element_type))
    }

    /// Reachable for new work: not terminated and not declared lost.
    pub fn is_available(&self) -> bool {
        self.state != ParticipantState::Terminated && self.health != HealthStatus::OffLine
    }
}
