// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! What one replica knows about its definitions and instances.
//!
//! Instances only ever contain the elements this replica holds. Values are
//! stored as received, so sensitive properties stay encrypted at rest.

use std::collections::BTreeMap;

use acm_protocol::messages::{InstanceInfo, PrimedDefinition, Status};
use acm_protocol::model::{
    AcElement, AutomationComposition, ElementDefinition, ElementInfo, HealthStatus,
    ParticipantState, ReplicaKey,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ParticipantCache {
    key: ReplicaKey,
    state: ParticipantState,
    health: HealthStatus,
    definitions: BTreeMap<Uuid, Vec<ElementDefinition>>,
    instances: BTreeMap<Uuid, AutomationComposition>,
}

impl ParticipantCache {
    pub fn new(key: ReplicaKey) -> Self {
        Self {
            key,
            state: ParticipantState::Unknown,
            health: HealthStatus::Unknown,
            definitions: BTreeMap::new(),
            instances: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> ParticipantState {
        self.state
    }

    pub fn set_state(&mut self, state: ParticipantState) {
        self.state = state;
    }

    pub fn set_health(&mut self, health: HealthStatus) {
        self.health = health;
    }

    pub fn is_primed(&self, composition_id: Uuid) -> bool {
        self.definitions.contains_key(&composition_id)
    }

    pub fn set_definitions(&mut self, composition_id: Uuid, definitions: Vec<ElementDefinition>) {
        self.definitions.insert(composition_id, definitions);
    }

    pub fn remove_definitions(&mut self, composition_id: Uuid) -> Option<Vec<ElementDefinition>> {
        self.definitions.remove(&composition_id)
    }

    /// Elements of `elements` held by this replica.
    pub fn own_elements(&self, elements: &[AcElement]) -> Vec<AcElement> {
        elements
            .iter()
            .filter(|e| e.is_held_by(self.key.participant_id, self.key.replica_id))
            .cloned()
            .collect()
    }

    pub fn instance(&self, instance_id: Uuid) -> Option<&AutomationComposition> {
        self.instances.get(&instance_id)
    }

    /// Store an instance, keeping only the elements this replica holds.
    ///
    /// Element info already reported here survives when the incoming copy
    /// carries none. Returns false, storing nothing, when none of the
    /// elements is held here.
    pub fn put_instance(&mut self, mut instance: AutomationComposition) -> bool {
        let (participant_id, replica_id) = (self.key.participant_id, self.key.replica_id);
        instance
            .elements
            .retain(|_, e| e.is_held_by(participant_id, replica_id));
        if instance.elements.is_empty() {
            self.instances.remove(&instance.instance_id);
            return false;
        }
        if let Some(previous) = self.instances.get(&instance.instance_id) {
            for (id, element) in instance.elements.iter_mut() {
                if let Some(known) = previous.elements.get(id)
                    && element.info.is_empty()
                {
                    element.info = known.info.clone();
                }
            }
        }
        self.instances.insert(instance.instance_id, instance);
        true
    }

    pub fn remove_instance(&mut self, instance_id: Uuid) -> Option<AutomationComposition> {
        self.instances.remove(&instance_id)
    }

    /// Replace every instance of a composition with `instances`.
    pub fn replace_instances(
        &mut self,
        composition_id: Uuid,
        instances: impl IntoIterator<Item = AutomationComposition>,
    ) -> usize {
        self.instances
            .retain(|_, i| i.composition_id != composition_id);
        instances
            .into_iter()
            .filter(|i| i.composition_id == composition_id)
            .map(|i| self.put_instance(i))
            .filter(|stored| *stored)
            .count()
    }

    pub fn instance_infos(&self) -> Vec<InstanceInfo> {
        self.instances.values().map(instance_info).collect()
    }

    /// Record what an element reported about itself.
    ///
    /// Returns the updated summary of its instance, or `None` when the
    /// element is not held here.
    pub fn set_element_info(
        &mut self,
        instance_id: Uuid,
        element_id: Uuid,
        info: ElementInfo,
    ) -> Option<InstanceInfo> {
        let instance = self.instances.get_mut(&instance_id)?;
        instance.elements.get_mut(&element_id)?.info = info;
        Some(instance_info(instance))
    }

    /// Status report for the runtime.
    pub fn status(&self, include_definitions: bool) -> Status {
        let definitions = if include_definitions {
            self.definitions
                .iter()
                .map(|(composition_id, definitions)| PrimedDefinition {
                    composition_id: *composition_id,
                    element_count: definitions.len(),
                })
                .collect()
        } else {
            Vec::new()
        };
        Status {
            state: self.state,
            health: self.health,
            instances: self.instance_infos(),
            definitions,
        }
    }
}

fn instance_info(instance: &AutomationComposition) -> InstanceInfo {
    InstanceInfo {
        automation_composition_id: instance.instance_id,
        composition_id: instance.composition_id,
        state: instance.state,
        element_states: instance
            .elements
            .iter()
            .map(|(id, e)| (*id, e.state))
            .collect(),
        element_info: instance
            .elements
            .iter()
            .filter(|(_, e)| !e.info.is_empty())
            .map(|(id, e)| (*id, e.info.clone()))
            .collect(),
    }
}
