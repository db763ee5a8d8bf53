// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callbacks a participant implements to act on its elements.
//!
//! The handler invokes one callback per element and turns the returned
//! `Result` into the element's reported state. Properties arrive with
//! sensitive values already decrypted when the participant has a pass
//! phrase configured.
//!
//! Use state, operational state and out-properties are not part of a
//! callback result. Report them at any time through
//! [`ParticipantHandler::send_element_info`](crate::handler::ParticipantHandler::send_element_info).

use acm_protocol::model::{AcElement, ElementDefinition, OrderedState};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Element lifecycle callbacks.
#[async_trait]
pub trait ElementListener: Send + Sync {
    /// Element definitions of a composition were handed to this participant.
    async fn prime(&self, composition_id: Uuid, definitions: &[ElementDefinition]) -> Result<()>;

    /// Element definitions of a composition were withdrawn.
    async fn deprime(&self, composition_id: Uuid) -> Result<()>;

    /// Bring an element to PASSIVE.
    async fn deploy(&self, instance_id: Uuid, element: &AcElement) -> Result<()>;

    /// Take an element back to UNINITIALISED.
    async fn undeploy(&self, instance_id: Uuid, element: &AcElement) -> Result<()>;

    /// Move a deployed element between PASSIVE and RUNNING.
    async fn state_change(
        &self,
        instance_id: Uuid,
        element: &AcElement,
        ordered_state: OrderedState,
    ) -> Result<()>;

    /// Element properties changed while deployed.
    async fn update(&self, _instance_id: Uuid, _element: &AcElement) -> Result<()> {
        Ok(())
    }

    /// Move an element to the definition of `composition_target_id`.
    ///
    /// `element` already refers to the target definition. With `rollback`
    /// set the target is the definition used before the migration.
    async fn migrate(
        &self,
        _instance_id: Uuid,
        _element: &AcElement,
        _composition_target_id: Uuid,
        _stage: u32,
        _rollback: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Check that a migration could succeed without changing anything.
    async fn migrate_precheck(
        &self,
        _instance_id: Uuid,
        _element: &AcElement,
        _composition_target_id: Uuid,
    ) -> Result<()> {
        Ok(())
    }

    /// Prepare an element before deploy, or review a deployed one when
    /// `pre_deploy` is false.
    async fn prepare(
        &self,
        _instance_id: Uuid,
        _element: &AcElement,
        _pre_deploy: bool,
        _stage: u32,
    ) -> Result<()> {
        Ok(())
    }
}
