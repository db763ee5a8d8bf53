// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message envelope and the message-type taxonomy exchanged over the bus.
//!
//! Every message is a [`ParticipantMessage`]: a shared [`Envelope`] plus one
//! [`Payload`] variant. Both are flattened into a single JSON object whose
//! `messageType` field selects the variant.
//!
//! Runtime → participant:
//! - `PARTICIPANT_REGISTER_ACK`, `PARTICIPANT_DEREGISTER_ACK`
//! - `PARTICIPANT_STATUS_REQ`
//! - `PARTICIPANT_PRIME` (empty definition list means deprime)
//! - `PARTICIPANT_SYNC`
//! - `PARTICIPANT_STATE_CHANGE`
//! - `AUTOMATION_COMPOSITION_DEPLOY`, `AUTOMATION_COMPOSITION_UNDEPLOY`
//! - `AUTOMATION_COMPOSITION_STATE_CHANGE`
//! - `PROPERTIES_UPDATE`
//! - `AUTOMATION_COMPOSITION_MIGRATION`
//! - `AUTOMATION_COMPOSITION_PREPARE`
//!
//! Participant → runtime: `PARTICIPANT_REGISTER`, `PARTICIPANT_DEREGISTER`,
//! `PARTICIPANT_STATUS` and one `*_ACK` per command above.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    AcElement, AcState, AutomationComposition, DefinitionState, ElementInfo, HealthStatus,
    OrderedState, ParticipantDefinition, ParticipantState, SupportedElementType,
};

// ============================================================================
// Envelope
// ============================================================================

/// Fields carried by every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per send.
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Sender, or single target participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<Uuid>,
    /// Sender replica, or single target replica.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_id: Option<Uuid>,
    /// Multi-target filter. Empty means no filter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant_id_list: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_composition_id: Option<Uuid>,
}

impl Envelope {
    /// Fresh envelope with a new message id and no addressing.
    pub fn new() -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            participant_id: None,
            replica_id: None,
            participant_id_list: Vec::new(),
            composition_id: None,
            automation_composition_id: None,
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Shared payload parts
// ============================================================================

/// Result of a command, carried by every ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Message id of the command being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<Uuid>,
    pub result: bool,
    #[serde(default)]
    pub message: String,
}

impl Ack {
    pub fn success(response_to: Uuid, message: impl Into<String>) -> Self {
        Self {
            response_to: Some(response_to),
            result: true,
            message: message.into(),
        }
    }

    pub fn failure(response_to: Uuid, message: impl Into<String>) -> Self {
        Self {
            response_to: Some(response_to),
            result: false,
            message: message.into(),
        }
    }
}

/// Per-element outcome reported in instance acks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementResult {
    pub state: AcState,
    pub result: bool,
    #[serde(default)]
    pub message: String,
}

/// Ack for any command addressed to a composition instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAck {
    pub ack: Ack,
    /// Instance state on the replica after applying the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AcState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<u32>,
    #[serde(default)]
    pub element_results: BTreeMap<Uuid, ElementResult>,
}

/// Ack for a participant state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStateAck {
    pub ack: Ack,
    pub state: ParticipantState,
}

/// Instance summary inside a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub automation_composition_id: Uuid,
    pub composition_id: Uuid,
    pub state: AcState,
    #[serde(default)]
    pub element_states: BTreeMap<Uuid, AcState>,
    /// Elements that reported use state, operational state or out-properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub element_info: BTreeMap<Uuid, ElementInfo>,
}

// ============================================================================
// Participant -> runtime
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    #[serde(default)]
    pub supported_element_types: Vec<SupportedElementType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deregister {}

/// Heartbeat, or the answer to a status request or sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub state: ParticipantState,
    pub health: HealthStatus,
    #[serde(default)]
    pub instances: Vec<InstanceInfo>,
    /// Primed definitions. Only filled when answering a status request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub definitions: Vec<PrimedDefinition>,
}

/// Definition held by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimedDefinition {
    pub composition_id: Uuid,
    pub element_count: usize,
}

// ============================================================================
// Runtime -> participant
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReq {}

/// Push element definitions of a composition. An empty list deprimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prime {
    #[serde(default)]
    pub participant_definitions: Vec<ParticipantDefinition>,
}

/// Restart/sync snapshot for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sync {
    /// Replicas that already hold authoritative copies and must not re-apply.
    #[serde(default)]
    pub exclude_replicas: Vec<Uuid>,
    #[serde(default)]
    pub restarting: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub state: DefinitionState,
    #[serde(default)]
    pub participant_definitions: Vec<ParticipantDefinition>,
    #[serde(default)]
    pub instances: Vec<AutomationComposition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStateChange {
    pub state: ParticipantState,
}

/// Create the instance's elements on their owners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deploy {
    pub elements: Vec<AcElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Undeploy {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub ordered_state: OrderedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesUpdate {
    pub elements: Vec<AcElement>,
}

/// One stage of a migration, a rollback or a migration precheck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migrate {
    pub composition_target_id: Uuid,
    #[serde(default)]
    pub precheck: bool,
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub stage: u32,
    /// Elements taking part in this stage, carrying their target definitions.
    pub elements: Vec<AcElement>,
}

/// One stage of a prepare (pre-deploy) or review (post-deploy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prepare {
    pub pre_deploy: bool,
    #[serde(default)]
    pub stage: u32,
    pub elements: Vec<AcElement>,
}

// ============================================================================
// Message
// ============================================================================

/// Message payload, discriminated by `messageType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    ParticipantRegister(Register),
    ParticipantRegisterAck(Ack),
    ParticipantDeregister(Deregister),
    ParticipantDeregisterAck(Ack),
    ParticipantStatus(Status),
    ParticipantStatusReq(StatusReq),
    ParticipantPrime(Prime),
    ParticipantPrimeAck(Ack),
    ParticipantSync(Sync),
    ParticipantStateChange(ParticipantStateChange),
    ParticipantStateChangeAck(ParticipantStateAck),
    AutomationCompositionDeploy(Deploy),
    AutomationCompositionDeployAck(InstanceAck),
    AutomationCompositionUndeploy(Undeploy),
    AutomationCompositionUndeployAck(InstanceAck),
    AutomationCompositionStateChange(StateChange),
    AutomationCompositionStateChangeAck(InstanceAck),
    PropertiesUpdate(PropertiesUpdate),
    PropertiesUpdateAck(InstanceAck),
    AutomationCompositionMigration(Migrate),
    AutomationCompositionMigrationAck(InstanceAck),
    AutomationCompositionPrepare(Prepare),
    AutomationCompositionPrepareAck(InstanceAck),
}

impl Payload {
    /// Wire name of the message type.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ParticipantRegister(_) => "PARTICIPANT_REGISTER",
            Self::ParticipantRegisterAck(_) => "PARTICIPANT_REGISTER_ACK",
            Self::ParticipantDeregister(_) => "PARTICIPANT_DEREGISTER",
            Self::ParticipantDeregisterAck(_) => "PARTICIPANT_DEREGISTER_ACK",
            Self::ParticipantStatus(_) => "PARTICIPANT_STATUS",
            Self::ParticipantStatusReq(_) => "PARTICIPANT_STATUS_REQ",
            Self::ParticipantPrime(_) => "PARTICIPANT_PRIME",
            Self::ParticipantPrimeAck(_) => "PARTICIPANT_PRIME_ACK",
            Self::ParticipantSync(_) => "PARTICIPANT_SYNC",
            Self::ParticipantStateChange(_) => "PARTICIPANT_STATE_CHANGE",
            Self::ParticipantStateChangeAck(_) => "PARTICIPANT_STATE_CHANGE_ACK",
            Self::AutomationCompositionDeploy(_) => "AUTOMATION_COMPOSITION_DEPLOY",
            Self::AutomationCompositionDeployAck(_) => "AUTOMATION_COMPOSITION_DEPLOY_ACK",
            Self::AutomationCompositionUndeploy(_) => "AUTOMATION_COMPOSITION_UNDEPLOY",
            Self::AutomationCompositionUndeployAck(_) => "AUTOMATION_COMPOSITION_UNDEPLOY_ACK",
            Self::AutomationCompositionStateChange(_) => "AUTOMATION_COMPOSITION_STATE_CHANGE",
            Self::AutomationCompositionStateChangeAck(_) => {
                "AUTOMATION_COMPOSITION_STATE_CHANGE_ACK"
            }
            Self::PropertiesUpdate(_) => "PROPERTIES_UPDATE",
            Self::PropertiesUpdateAck(_) => "PROPERTIES_UPDATE_ACK",
            Self::AutomationCompositionMigration(_) => "AUTOMATION_COMPOSITION_MIGRATION",
            Self::AutomationCompositionMigrationAck(_) => "AUTOMATION_COMPOSITION_MIGRATION_ACK",
            Self::AutomationCompositionPrepare(_) => "AUTOMATION_COMPOSITION_PREPARE",
            Self::AutomationCompositionPrepareAck(_) => "AUTOMATION_COMPOSITION_PREPARE_ACK",
        }
    }

    /// Common ack part, if this payload answers a command.
    pub fn ack(&self) -> Option<&Ack> {
        match self {
            Self::ParticipantRegisterAck(ack)
            | Self::ParticipantDeregisterAck(ack)
            | Self::ParticipantPrimeAck(ack) => Some(ack),
            Self::ParticipantStateChangeAck(a) => Some(&a.ack),
            Self::AutomationCompositionDeployAck(a)
            | Self::AutomationCompositionUndeployAck(a)
            | Self::AutomationCompositionStateChangeAck(a)
            | Self::PropertiesUpdateAck(a)
            | Self::AutomationCompositionMigrationAck(a)
            | Self::AutomationCompositionPrepareAck(a) => Some(&a.ack),
            _ => None,
        }
    }

    /// Instance-level ack body, if any.
    pub fn instance_ack(&self) -> Option<&InstanceAck> {
        match self {
            Self::AutomationCompositionDeployAck(a)
            | Self::AutomationCompositionUndeployAck(a)
            | Self::AutomationCompositionStateChangeAck(a)
            | Self::PropertiesUpdateAck(a)
            | Self::AutomationCompositionMigrationAck(a)
            | Self::AutomationCompositionPrepareAck(a) => Some(a),
            _ => None,
        }
    }

    /// Sent by participants rather than the runtime.
    pub fn is_from_participant(&self) -> bool {
        matches!(
            self,
            Self::ParticipantRegister(_) | Self::ParticipantDeregister(_) | Self::ParticipantStatus(_)
        ) || self.is_participant_ack()
    }

    fn is_participant_ack(&self) -> bool {
        !matches!(
            self,
            Self::ParticipantRegisterAck(_) | Self::ParticipantDeregisterAck(_)
        ) && self.ack().is_some()
    }
}

/// A message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub payload: Payload,
}

impl ParticipantMessage {
    /// Broadcast message with a fresh envelope.
    pub fn new(payload: Payload) -> Self {
        Self {
            envelope: Envelope::new(),
            payload,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.envelope.message_id
    }

    pub fn message_type(&self) -> &'static str {
        self.payload.message_type()
    }

    /// Address a single participant (all its replicas), or stamp the sender.
    pub fn with_participant(mut self, participant_id: Uuid) -> Self {
        self.envelope.participant_id = Some(participant_id);
        self
    }

    /// Address a single replica, or stamp the sending replica.
    pub fn with_replica(mut self, participant_id: Uuid, replica_id: Uuid) -> Self {
        self.envelope.participant_id = Some(participant_id);
        self.envelope.replica_id = Some(replica_id);
        self
    }

    /// Restrict delivery to the listed participants.
    pub fn with_participant_list(mut self, participant_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.envelope.participant_id_list = participant_ids.into_iter().collect();
        self
    }

    pub fn with_composition(mut self, composition_id: Uuid) -> Self {
        self.envelope.composition_id = Some(composition_id);
        self
    }

    pub fn with_instance(mut self, instance_id: Uuid) -> Self {
        self.envelope.automation_composition_id = Some(instance_id);
        self
    }

    /// Answer to `request`, sent by the given replica.
    ///
    /// Copies the composition and instance ids of the request.
    pub fn reply(request: &Envelope, participant_id: Uuid, replica_id: Uuid, payload: Payload) -> Self {
        let mut envelope = Envelope::new();
        envelope.participant_id = Some(participant_id);
        envelope.replica_id = Some(replica_id);
        envelope.composition_id = request.composition_id;
        envelope.automation_composition_id = request.automation_composition_id;
        Self { envelope, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConceptId;

    #[test]
    fn test_message_type_tag_matches_wire_name() {
        let payloads = vec![
            Payload::ParticipantStatusReq(StatusReq {}),
            Payload::ParticipantDeregister(Deregister {}),
            Payload::AutomationCompositionStateChange(StateChange {
                ordered_state: OrderedState::Running,
            }),
            Payload::AutomationCompositionMigrationAck(InstanceAck {
                ack: Ack::success(Uuid::new_v4(), "done"),
                state: Some(AcState::Running),
                stage: Some(1),
                element_results: BTreeMap::new(),
            }),
        ];

        for payload in payloads {
            let expected = payload.message_type();
            let json = serde_json::to_value(ParticipantMessage::new(payload)).unwrap();
            assert_eq!(json["messageType"], expected);
        }
    }

    #[test]
    fn test_envelope_is_flattened_in_camel_case() {
        let participant = Uuid::new_v4();
        let instance = Uuid::new_v4();
        let msg = ParticipantMessage::new(Payload::AutomationCompositionUndeploy(Undeploy {}))
            .with_participant_list([participant])
            .with_instance(instance);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["participantIdList"][0], participant.to_string());
        assert_eq!(json["automationCompositionId"], instance.to_string());
        assert!(json.get("participantId").is_none());
        assert!(json.get("envelope").is_none());
    }

    #[test]
    fn test_deploy_message_parses_back_with_elements() {
        let participant = Uuid::new_v4();
        let element = AcElement::new(ConceptId::new("org.acm.Element", "1.0.0"), participant);
        let msg = ParticipantMessage::new(Payload::AutomationCompositionDeploy(Deploy {
            elements: vec![element.clone()],
        }))
        .with_participant_list([participant]);

        let parsed: ParticipantMessage =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(parsed.envelope, msg.envelope);
        match parsed.payload {
            Payload::AutomationCompositionDeploy(deploy) => {
                assert_eq!(deploy.elements, vec![element]);
            }
            other => panic!("unexpected payload {}", other.message_type()),
        }
    }

    #[test]
    fn test_reply_copies_instance_addressing() {
        let request = ParticipantMessage::new(Payload::AutomationCompositionUndeploy(Undeploy {}))
            .with_composition(Uuid::new_v4())
            .with_instance(Uuid::new_v4());
        let (p, r) = (Uuid::new_v4(), Uuid::new_v4());

        let reply = ParticipantMessage::reply(
            &request.envelope,
            p,
            r,
            Payload::ParticipantPrimeAck(Ack::success(request.message_id(), "")),
        );
        assert_eq!(reply.envelope.participant_id, Some(p));
        assert_eq!(reply.envelope.replica_id, Some(r));
        assert_eq!(reply.envelope.composition_id, request.envelope.composition_id);
        assert_eq!(
            reply.envelope.automation_composition_id,
            request.envelope.automation_composition_id
        );
        assert_ne!(reply.message_id(), request.message_id());
    }

    #[test]
    fn test_direction_of_payloads() {
        let ack = Ack::success(Uuid::new_v4(), "");
        assert!(Payload::ParticipantPrimeAck(ack.clone()).is_from_participant());
        assert!(!Payload::ParticipantRegisterAck(ack).is_from_participant());
        assert!(!Payload::ParticipantStatusReq(StatusReq {}).is_from_participant());
        assert!(
            Payload::ParticipantRegister(Register {
                supported_element_types: vec![]
            })
            .is_from_participant()
        );
    }
}
