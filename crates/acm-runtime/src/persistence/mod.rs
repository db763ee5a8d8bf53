// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interface for definitions, instances and participants.
//!
//! The coordinator treats the provider as an opaque store. Records are
//! stored and returned whole; instance properties are stored as given, which
//! means already encrypted.

pub mod memory;

pub use self::memory::InMemoryProvider;

use acm_protocol::model::{
    AutomationComposition, CompositionDefinition, Participant, ReplicaKey,
};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RuntimeError;

/// Store for the coordinator's authoritative view.
#[async_trait]
pub trait Provider: Send + Sync {
    // ========================================================================
    // Composition definitions
    // ========================================================================

    /// Insert or replace a definition.
    async fn save_definition(&self, definition: &CompositionDefinition) -> Result<(), RuntimeError>;

    async fn get_definition(
        &self,
        composition_id: Uuid,
    ) -> Result<Option<CompositionDefinition>, RuntimeError>;

    /// Definitions whose service template has the given name and version.
    async fn find_definitions(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<CompositionDefinition>, RuntimeError>;

    async fn list_definitions(&self) -> Result<Vec<CompositionDefinition>, RuntimeError>;

    /// Remove a definition. Returns whether it existed.
    async fn delete_definition(&self, composition_id: Uuid) -> Result<bool, RuntimeError>;

    // ========================================================================
    // Composition instances
    // ========================================================================

    /// Insert or replace an instance.
    async fn save_instance(&self, instance: &AutomationComposition) -> Result<(), RuntimeError>;

    async fn get_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<AutomationComposition>, RuntimeError>;

    /// Instances of a definition, including instances migrating to it.
    async fn list_instances(
        &self,
        composition_id: Uuid,
    ) -> Result<Vec<AutomationComposition>, RuntimeError>;

    async fn list_all_instances(&self) -> Result<Vec<AutomationComposition>, RuntimeError>;

    /// Remove an instance. Returns whether it existed.
    async fn delete_instance(&self, instance_id: Uuid) -> Result<bool, RuntimeError>;

    // ========================================================================
    // Participants
    // ========================================================================

    /// Insert or replace a participant replica.
    async fn save_participant(&self, participant: &Participant) -> Result<(), RuntimeError>;

    async fn get_participant(&self, key: ReplicaKey) -> Result<Option<Participant>, RuntimeError>;

    /// Replicas of one participant, ordered by replica id.
    async fn list_replicas(&self, participant_id: Uuid) -> Result<Vec<Participant>, RuntimeError>;

    async fn list_participants(&self) -> Result<Vec<Participant>, RuntimeError>;
}
