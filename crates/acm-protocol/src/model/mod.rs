// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data model shared by the runtime and participants.

mod composition;
mod definition;
mod participant;
mod state;

pub use composition::{AcElement, AutomationComposition, ElementInfo, ModelError};
pub use definition::{
    CompositionDefinition, ConceptId, DataType, ElementDefinition, EntrySchema, MAX_STAGE,
    NodeTemplate, NodeType, ParticipantDefinition, PropertyDefinition, ServiceTemplate,
};
pub use participant::{Participant, ReplicaKey, SupportedElementType};
pub use state::{AcState, DefinitionState, HealthStatus, OrderedState, ParticipantState};
