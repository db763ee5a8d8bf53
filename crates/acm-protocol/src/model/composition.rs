// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Automation composition instances and their elements.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::definition::ConceptId;
use super::participant::ReplicaKey;
use super::state::{AcState, OrderedState};

/// Structural problems in a composition instance.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("element keyed {key} carries id {id}")]
    ElementIdMismatch { key: Uuid, id: Uuid },

    #[error("composition {0} has no elements")]
    NoElements(Uuid),
}

/// What a participant reports about a running element outside of command
/// acks. The runtime stores it but never acts on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational_state: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub out_properties: Map<String, Value>,
}

impl ElementInfo {
    pub fn is_empty(&self) -> bool {
        self.use_state.is_none()
            && self.operational_state.is_none()
            && self.out_properties.is_empty()
    }
}

/// One element of a composition instance, owned by a single participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcElement {
    pub id: Uuid,
    pub definition: ConceptId,
    pub participant_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_id: Option<Uuid>,
    pub state: AcState,
    pub ordered_state: OrderedState,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub info: ElementInfo,
}

impl AcElement {
    pub fn new(definition: ConceptId, participant_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            participant_id,
            replica_id: None,
            state: AcState::Uninitialised,
            ordered_state: OrderedState::Uninitialised,
            properties: Map::new(),
            info: ElementInfo::default(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Owning replica, once one has been assigned.
    pub fn owner(&self) -> Option<ReplicaKey> {
        self.replica_id
            .map(|replica_id| ReplicaKey::new(self.participant_id, replica_id))
    }

    /// Whether the given replica holds this element.
    ///
    /// An element without an assigned replica is held by every replica of
    /// its participant.
    pub fn is_held_by(&self, participant_id: Uuid, replica_id: Uuid) -> bool {
        self.participant_id == participant_id
            && self.replica_id.is_none_or(|r| r == replica_id)
    }
}

/// Instance of a composition definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationComposition {
    pub instance_id: Uuid,
    pub composition_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_target_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_composition_id: Option<Uuid>,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state: AcState,
    pub ordered_state: OrderedState,
    #[serde(default)]
    pub deployed: bool,
    pub elements: BTreeMap<Uuid, AcElement>,
}

impl AutomationComposition {
    pub fn new(composition_id: Uuid, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            composition_id,
            composition_target_id: None,
            previous_composition_id: None,
            name: name.into(),
            version: version.into(),
            description: None,
            state: AcState::Uninitialised,
            ordered_state: OrderedState::Uninitialised,
            deployed: false,
            elements: BTreeMap::new(),
        }
    }

    pub fn with_element(mut self, element: AcElement) -> Self {
        self.elements.insert(element.id, element);
        self
    }

    /// Check that every element is keyed by its own id and that there is at
    /// least one element.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.elements.is_empty() {
            return Err(ModelError::NoElements(self.instance_id));
        }
        for (key, element) in &self.elements {
            if *key != element.id {
                return Err(ModelError::ElementIdMismatch {
                    key: *key,
                    id: element.id,
                });
            }
        }
        Ok(())
    }

    /// Distinct participants owning at least one element.
    pub fn participant_ids(&self) -> BTreeSet<Uuid> {
        self.elements.values().map(|e| e.participant_id).collect()
    }

    /// Distinct replicas owning at least one element.
    pub fn owners(&self) -> BTreeSet<ReplicaKey> {
        self.elements.values().filter_map(AcElement::owner).collect()
    }

    /// Elements held by the given replica.
    pub fn elements_held_by(
        &self,
        participant_id: Uuid,
        replica_id: Uuid,
    ) -> impl Iterator<Item = &AcElement> {
        self.elements
            .values()
            .filter(move |e| e.is_held_by(participant_id, replica_id))
    }

    /// Set composition and element state in one step.
    pub fn set_state(&mut self, state: AcState) {
        self.state = state;
        for element in self.elements.values_mut() {
            element.state = state;
        }
    }

    /// Set the ordered state on the composition and every element.
    pub fn set_ordered_state(&mut self, ordered: OrderedState) {
        self.ordered_state = ordered;
        for element in self.elements.values_mut() {
            element.ordered_state = ordered;
        }
    }

    /// Composition and every element sit in the ordered state.
    pub fn is_converged(&self) -> bool {
        let target = self.ordered_state.as_state();
        self.state == target && self.elements.values().all(|e| e.state == target)
    }
}
