// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory provider.

use std::collections::BTreeMap;

use acm_protocol::model::{
    AutomationComposition, CompositionDefinition, Participant, ReplicaKey,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Provider;
use crate::error::RuntimeError;

/// Provider keeping everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    definitions: RwLock<BTreeMap<Uuid, CompositionDefinition>>,
    instances: RwLock<BTreeMap<Uuid, AutomationComposition>>,
    participants: RwLock<BTreeMap<ReplicaKey, Participant>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn save_definition(&self, definition: &CompositionDefinition) -> Result<(), RuntimeError> {
        self.definitions
            .write()
            .await
            .insert(definition.composition_id, definition.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        composition_id: Uuid,
    ) -> Result<Option<CompositionDefinition>, RuntimeError> {
        Ok(self.definitions.read().await.get(&composition_id).cloned())
    }

    async fn find_definitions(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<CompositionDefinition>, RuntimeError> {
        Ok(self
            .definitions
            .read()
            .await
            .values()
            .filter(|d| d.service_template.name == name && d.service_template.version == version)
            .cloned()
            .collect())
    }

    async fn list_definitions(&self) -> Result<Vec<CompositionDefinition>, RuntimeError> {
        Ok(self.definitions.read().await.values().cloned().collect())
    }

    async fn delete_definition(&self, composition_id: Uuid) -> Result<bool, RuntimeError> {
        Ok(self.definitions.write().await.remove(&composition_id).is_some())
    }

    async fn save_instance(&self, instance: &AutomationComposition) -> Result<(), RuntimeError> {
        self.instances
            .write()
            .await
            .insert(instance.instance_id, instance.clone());
        Ok(())
    }

    async fn get_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<AutomationComposition>, RuntimeError> {
        Ok(self.instances.read().await.get(&instance_id).cloned())
    }

    async fn list_instances(
        &self,
        composition_id: Uuid,
    ) -> Result<Vec<AutomationComposition>, RuntimeError> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| {
                i.composition_id == composition_id
                    || i.composition_target_id == Some(composition_id)
            })
            .cloned()
            .collect())
    }

    async fn list_all_instances(&self) -> Result<Vec<AutomationComposition>, RuntimeError> {
        Ok(self.instances.read().await.values().cloned().collect())
    }

    async fn delete_instance(&self, instance_id: Uuid) -> Result<bool, RuntimeError> {
        Ok(self.instances.write().await.remove(&instance_id).is_some())
    }

    async fn save_participant(&self, participant: &Participant) -> Result<(), RuntimeError> {
        self.participants
            .write()
            .await
            .insert(participant.key(), participant.clone());
        Ok(())
    }

    async fn get_participant(&self, key: ReplicaKey) -> Result<Option<Participant>, RuntimeError> {
        Ok(self.participants.read().await.get(&key).cloned())
    }

    async fn list_replicas(&self, participant_id: Uuid) -> Result<Vec<Participant>, RuntimeError> {
        Ok(self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.participant_id == participant_id)
            .cloned()
            .collect())
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, RuntimeError> {
        Ok(self.participants.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acm_protocol::model::{
        AcElement, ConceptId, ServiceTemplate, SupportedElementType,
    };

    #[tokio::test]
    async fn test_definition_lookup_by_name_and_version() {
        let provider = InMemoryProvider::new();
        let definition = CompositionDefinition::new(ServiceTemplate::new("demo", "1.0.0"));
        provider.save_definition(&definition).await.unwrap();

        assert_eq!(provider.find_definitions("demo", "1.0.0").await.unwrap().len(), 1);
        assert!(provider.find_definitions("demo", "2.0.0").await.unwrap().is_empty());
        assert!(provider.delete_definition(definition.composition_id).await.unwrap());
        assert!(!provider.delete_definition(definition.composition_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_instances_include_migration_targets() {
        let provider = InMemoryProvider::new();
        let source = Uuid::new_v4();
        let target = Uuid::new_v4();
        let element = AcElement::new(ConceptId::new("e", "1.0.0"), Uuid::new_v4());
        let mut instance = AutomationComposition::new(source, "ac", "1.0.0").with_element(element);
        instance.composition_target_id = Some(target);
        provider.save_instance(&instance).await.unwrap();

        assert_eq!(provider.list_instances(source).await.unwrap().len(), 1);
        assert_eq!(provider.list_instances(target).await.unwrap().len(), 1);
        assert!(provider.list_instances(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replicas_are_grouped_by_participant() {
        let provider = InMemoryProvider::new();
        let participant_id = Uuid::new_v4();
        let types = vec![SupportedElementType::new("t", "1.0.0")];
        for _ in 0..2 {
            let key = ReplicaKey::new(participant_id, Uuid::new_v4());
            provider
                .save_participant(&Participant::new(key, types.clone()))
                .await
                .unwrap();
        }
        let other = ReplicaKey::new(Uuid::new_v4(), Uuid::new_v4());
        provider
            .save_participant(&Participant::new(other, vec![]))
            .await
            .unwrap();

        let replicas = provider.list_replicas(participant_id).await.unwrap();
        assert_eq!(replicas.len(), 2);
        assert!(replicas[0].replica_id < replicas[1].replica_id);
        assert_eq!(provider.list_participants().await.unwrap().len(), 3);
    }
}
