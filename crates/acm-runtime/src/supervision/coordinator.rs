// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime-side lifecycle coordination.
//!
//! The [`Coordinator`] owns every command that fans out to participants:
//! priming, deploy, state changes, property updates, migration, rollback and
//! prepare/review. Each command is published once on the participant topic,
//! tracked by message id and awaited within the configured budget. The
//! outcome is then folded back into the persisted definition or instance.
//!
//! Only one command may run per instance or definition at a time; a second
//! caller gets [`RuntimeError::CommandInProgress`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use acm_protocol::bus::{MessageBus, PARTICIPANT_TOPIC};
use acm_protocol::encryption::{EncryptionService, SensitivityIndex};
use acm_protocol::messages::{
    Ack, Deploy, ElementResult, Envelope, InstanceInfo, Migrate, ParticipantMessage,
    ParticipantStateChange, Payload, Prepare, Prime, PropertiesUpdate, Register, StateChange,
    Status, StatusReq, Sync, Undeploy,
};
use acm_protocol::model::{
    AcElement, AcState, AutomationComposition, CompositionDefinition, ConceptId, DefinitionState,
    ElementInfo, HealthStatus, NodeTemplate, OrderedState, Participant, ParticipantDefinition,
    ParticipantState, ReplicaKey, ServiceTemplate,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::tracker::{
    CommandKind, CommandOutcome, CommandSpec, CommandStatus, CommandTracker, CompletedCommand,
};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::persistence::Provider;

// ============================================================================
// Views
// ============================================================================

/// Most recent command issued against an instance, definition or participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCommand {
    pub command_id: Uuid,
    pub kind: CommandKind,
    pub outcome: CommandOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementView {
    pub element_id: Uuid,
    pub definition: ConceptId,
    pub participant_id: Uuid,
    pub replica_id: Option<Uuid>,
    pub state: AcState,
    pub ordered_state: OrderedState,
    #[serde(flatten)]
    pub info: ElementInfo,
}

/// Read model of an instance for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub instance_id: Uuid,
    pub composition_id: Uuid,
    pub composition_target_id: Option<Uuid>,
    pub previous_composition_id: Option<Uuid>,
    pub state: AcState,
    pub ordered_state: OrderedState,
    pub deployed: bool,
    /// Composition and every element sit in the ordered state.
    pub converged: bool,
    pub elements: Vec<ElementView>,
    pub last_command: Option<LastCommand>,
}

// ============================================================================
// Staged operations
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum StagedOperation {
    Migrate { target: Uuid },
    Rollback { target: Uuid },
    Prepare { pre_deploy: bool },
}

impl StagedOperation {
    fn kind(&self) -> CommandKind {
        match self {
            Self::Migrate { .. } => CommandKind::Migrate,
            Self::Rollback { .. } => CommandKind::Rollback,
            Self::Prepare { pre_deploy: true } => CommandKind::Prepare,
            Self::Prepare { pre_deploy: false } => CommandKind::Review,
        }
    }

    fn payload(&self, stage: u32, elements: Vec<AcElement>) -> Payload {
        match *self {
            Self::Migrate { target } | Self::Rollback { target } => {
                Payload::AutomationCompositionMigration(Migrate {
                    composition_target_id: target,
                    precheck: false,
                    rollback: matches!(self, Self::Rollback { .. }),
                    stage,
                    elements,
                })
            }
            Self::Prepare { pre_deploy } => Payload::AutomationCompositionPrepare(Prepare {
                pre_deploy,
                stage,
                elements,
            }),
        }
    }
}

/// Group element ids by the stages they take part in, in ascending order.
///
/// Elements whose template cannot be found run in stage 0.
pub fn stage_plan(
    elements: &BTreeMap<Uuid, AcElement>,
    template: &ServiceTemplate,
    stages_of: fn(&NodeTemplate) -> BTreeSet<u32>,
) -> BTreeMap<u32, Vec<Uuid>> {
    let mut plan: BTreeMap<u32, Vec<Uuid>> = BTreeMap::new();
    for element in elements.values() {
        let stages = template
            .element_template(&element.definition)
            .map(stages_of)
            .unwrap_or_else(|| BTreeSet::from([0]));
        for stage in stages {
            plan.entry(stage).or_default().push(element.id);
        }
    }
    plan
}

fn require_primed(definition: &CompositionDefinition) -> Result<()> {
    if definition.state == DefinitionState::Primed {
        Ok(())
    } else {
        Err(RuntimeError::DefinitionNotPrimed {
            composition_id: definition.composition_id,
            state: definition.state.to_string(),
        })
    }
}

fn apply_element_results(
    instance: &mut AutomationComposition,
    results: &BTreeMap<Uuid, ElementResult>,
) {
    for (element_id, result) in results {
        match instance.elements.get_mut(element_id) {
            Some(element) => element.state = result.state,
            None => debug!(element_id = %element_id, "Result for unknown element ignored"),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<Uuid>>,
    target_id: Uuid,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target_id);
    }
}

/// Drives composition lifecycle commands and aggregates participant acks.
pub struct Coordinator {
    provider: Arc<dyn Provider>,
    bus: Arc<dyn MessageBus>,
    encryption: EncryptionService,
    tracker: CommandTracker,
    command_timeout: Duration,
    participant_timeout: Duration,
    busy: Mutex<HashSet<Uuid>>,
    last_commands: Mutex<HashMap<Uuid, LastCommand>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("provider", &"...")
            .field("bus", &"...")
            .field("encryption", &self.encryption)
            .field("tracker", &self.tracker)
            .field("command_timeout", &self.command_timeout)
            .field("participant_timeout", &self.participant_timeout)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        provider: Arc<dyn Provider>,
        bus: Arc<dyn MessageBus>,
        encryption: EncryptionService,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            provider,
            bus,
            encryption,
            tracker: CommandTracker::new(),
            command_timeout: config.command_timeout,
            participant_timeout: config.participant_timeout,
            busy: Mutex::new(HashSet::new()),
            last_commands: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn tracker(&self) -> &CommandTracker {
        &self.tracker
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.encryption
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn acquire(&self, target_id: Uuid) -> Result<BusyGuard<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(target_id) {
            return Err(RuntimeError::CommandInProgress { target_id });
        }
        Ok(BusyGuard {
            busy: &self.busy,
            target_id,
        })
    }

    fn remember(&self, target_id: Uuid, completed: &CompletedCommand) {
        self.last_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                target_id,
                LastCommand {
                    command_id: completed.command_id,
                    kind: completed.spec.kind,
                    outcome: completed.outcome.clone(),
                },
            );
    }

    fn already_in_state(&self, target_id: Uuid, spec: CommandSpec) -> CommandOutcome {
        info!(target_id = %target_id, kind = %spec.kind, "Already in requested state");
        let completed =
            self.tracker
                .finish_now(Uuid::new_v4(), spec, CommandOutcome::AlreadyInState);
        self.remember(target_id, &completed);
        completed.outcome
    }

    async fn publish(&self, message: &ParticipantMessage) -> Result<()> {
        self.bus.publish(PARTICIPANT_TOPIC, message).await?;
        Ok(())
    }

    /// Publish a tracked command and wait for its outcome.
    async fn dispatch(
        &self,
        target_id: Uuid,
        spec: CommandSpec,
        expected: BTreeSet<ReplicaKey>,
        message: ParticipantMessage,
    ) -> Result<CompletedCommand> {
        let command_id = message.message_id();
        let handle = self.tracker.register(command_id, spec, expected);
        if let Err(e) = self.publish(&message).await {
            self.tracker.abandon(command_id);
            return Err(e);
        }
        let completed = self.tracker.wait(handle, self.command_timeout).await;
        self.remember(target_id, &completed);
        Ok(completed)
    }

    async fn get_instance(&self, instance_id: Uuid) -> Result<AutomationComposition> {
        self.provider
            .get_instance(instance_id)
            .await?
            .ok_or(RuntimeError::InstanceNotFound { instance_id })
    }

    async fn get_definition(&self, composition_id: Uuid) -> Result<CompositionDefinition> {
        self.provider
            .get_definition(composition_id)
            .await?
            .ok_or(RuntimeError::DefinitionNotFound { composition_id })
    }

    async fn available_replicas(&self, participant_id: Uuid) -> Result<Vec<Participant>> {
        Ok(self
            .provider
            .list_replicas(participant_id)
            .await?
            .into_iter()
            .filter(Participant::is_available)
            .collect())
    }

    async fn expected_replicas(
        &self,
        participant_ids: &BTreeSet<Uuid>,
    ) -> Result<BTreeSet<ReplicaKey>> {
        let mut expected = BTreeSet::new();
        for participant_id in participant_ids {
            expected.extend(
                self.available_replicas(*participant_id)
                    .await?
                    .iter()
                    .map(Participant::key),
            );
        }
        Ok(expected)
    }

    /// Pin every element to one live replica of its participant, keeping
    /// existing assignments whose replica is still available.
    async fn assign_replicas(&self, instance: &mut AutomationComposition) -> Result<()> {
        let mut replicas: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for element in instance.elements.values_mut() {
            let participant_id = element.participant_id;
            if !replicas.contains_key(&participant_id) {
                let available = self.available_replicas(participant_id).await?;
                replicas.insert(participant_id, available);
            }
            let available = replicas
                .get(&participant_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let kept = element
                .replica_id
                .filter(|r| available.iter().any(|p| p.replica_id == *r));
            let replica_id = match kept {
                Some(replica_id) => replica_id,
                None => {
                    available
                        .first()
                        .ok_or(RuntimeError::ParticipantNotFound { participant_id })?
                        .replica_id
                }
            };
            element.replica_id = Some(replica_id);
        }
        Ok(())
    }

    /// Copy of the instance's elements pointing at `target` definitions,
    /// with sensitive values encrypted against the target's types.
    fn retarget_elements(
        &self,
        instance: &AutomationComposition,
        target: &CompositionDefinition,
    ) -> Result<BTreeMap<Uuid, AcElement>> {
        let mut elements = instance.elements.clone();
        for element in elements.values_mut() {
            let template = target
                .service_template
                .element_template(&element.definition)
                .ok_or_else(|| {
                    RuntimeError::validation(
                        "compositionTargetId",
                        format!(
                            "element definition {} is missing from {}",
                            element.definition.name, target.composition_id
                        ),
                    )
                })?;
            element.definition = ConceptId::new(&element.definition.name, &template.version);
        }
        let index = SensitivityIndex::build(&target.service_template);
        self.encryption
            .encrypt_elements(elements.values_mut(), &index)?;
        Ok(elements)
    }

    // ------------------------------------------------------------------------
    // Composition definitions
    // ------------------------------------------------------------------------

    /// Store a new composition definition in UNPRIMED state.
    #[instrument(skip_all, fields(name = %service_template.name, version = %service_template.version))]
    pub async fn commission(
        &self,
        service_template: ServiceTemplate,
    ) -> Result<CompositionDefinition> {
        if service_template.name.is_empty() || service_template.version.is_empty() {
            return Err(RuntimeError::validation(
                "serviceTemplate",
                "name and version are required",
            ));
        }
        if service_template.node_templates.is_empty() {
            return Err(RuntimeError::validation(
                "nodeTemplates",
                "at least one element definition is required",
            ));
        }
        let existing = self
            .provider
            .find_definitions(&service_template.name, &service_template.version)
            .await?;
        if !existing.is_empty() {
            return Err(RuntimeError::validation(
                "serviceTemplate",
                format!(
                    "{}:{} is already commissioned",
                    service_template.name, service_template.version
                ),
            ));
        }

        let definition = CompositionDefinition::new(service_template);
        self.provider.save_definition(&definition).await?;
        info!(composition_id = %definition.composition_id, "Composition definition commissioned");
        Ok(definition)
    }

    /// Remove an UNPRIMED definition that no instance references.
    #[instrument(skip_all, fields(composition_id = %composition_id))]
    pub async fn decommission(&self, composition_id: Uuid) -> Result<()> {
        let _guard = self.acquire(composition_id)?;
        let definition = self.get_definition(composition_id).await?;
        if definition.state != DefinitionState::Unprimed {
            return Err(RuntimeError::validation(
                "state",
                format!("definition is {}, deprime it first", definition.state),
            ));
        }
        let instances = self.provider.list_instances(composition_id).await?;
        if !instances.is_empty() {
            return Err(RuntimeError::DefinitionInUse {
                composition_id,
                instances: instances.len(),
            });
        }
        self.provider.delete_definition(composition_id).await?;
        info!("Composition definition decommissioned");
        Ok(())
    }

    /// Push element definitions to the participants supporting them.
    #[instrument(skip_all, fields(composition_id = %composition_id))]
    pub async fn prime(&self, composition_id: Uuid) -> Result<CommandOutcome> {
        let _guard = self.acquire(composition_id)?;
        let mut definition = self.get_definition(composition_id).await?;
        let spec = CommandSpec::new(CommandKind::Prime).composition(composition_id);
        match definition.state {
            DefinitionState::Primed => return Ok(self.already_in_state(composition_id, spec)),
            DefinitionState::Priming | DefinitionState::Depriming => {
                return Err(RuntimeError::CommandInProgress {
                    target_id: composition_id,
                });
            }
            DefinitionState::Unprimed => {}
        }

        let participants: Vec<Participant> = self
            .provider
            .list_participants()
            .await?
            .into_iter()
            .filter(Participant::is_available)
            .collect();
        let mut assignment = BTreeMap::new();
        for (name, template) in &definition.service_template.node_templates {
            let element_type = template.element_type();
            let owner = participants
                .iter()
                .find(|p| p.supports(&element_type))
                .ok_or_else(|| {
                    RuntimeError::validation(
                        "nodeTemplates",
                        format!("no participant supports {element_type} required by {name}"),
                    )
                })?;
            assignment.insert(name.clone(), owner.participant_id);
        }
        definition.element_participants = assignment;
        definition.state = DefinitionState::Priming;
        self.provider.save_definition(&definition).await?;

        let participant_ids = definition.participant_ids();
        let participant_definitions = participant_ids
            .iter()
            .map(|participant_id| ParticipantDefinition {
                participant_id: *participant_id,
                element_definitions: definition.definitions_for(*participant_id),
            })
            .collect();
        let expected = self.expected_replicas(&participant_ids).await?;
        let message = ParticipantMessage::new(Payload::ParticipantPrime(Prime {
            participant_definitions,
        }))
        .with_composition(composition_id)
        .with_participant_list(participant_ids.iter().copied());

        let completed = match self.dispatch(composition_id, spec, expected, message).await {
            Ok(completed) => completed,
            Err(e) => {
                definition.state = DefinitionState::Unprimed;
                definition.element_participants.clear();
                self.provider.save_definition(&definition).await?;
                return Err(e);
            }
        };

        if completed.outcome.is_success() {
            definition.state = DefinitionState::Primed;
            info!("Composition definition primed");
        } else {
            definition.state = DefinitionState::Unprimed;
            definition.element_participants.clear();
            warn!(outcome = %completed.outcome, "Prime did not complete, definition left UNPRIMED");
        }
        self.provider.save_definition(&definition).await?;
        Ok(completed.outcome)
    }

    /// Withdraw element definitions from participants.
    #[instrument(skip_all, fields(composition_id = %composition_id))]
    pub async fn deprime(&self, composition_id: Uuid) -> Result<CommandOutcome> {
        let _guard = self.acquire(composition_id)?;
        let mut definition = self.get_definition(composition_id).await?;
        let spec = CommandSpec::new(CommandKind::Deprime).composition(composition_id);
        match definition.state {
            DefinitionState::Unprimed => return Ok(self.already_in_state(composition_id, spec)),
            DefinitionState::Priming | DefinitionState::Depriming => {
                return Err(RuntimeError::CommandInProgress {
                    target_id: composition_id,
                });
            }
            DefinitionState::Primed => {}
        }
        let instances = self.provider.list_instances(composition_id).await?;
        if !instances.is_empty() {
            return Err(RuntimeError::DefinitionInUse {
                composition_id,
                instances: instances.len(),
            });
        }

        definition.state = DefinitionState::Depriming;
        self.provider.save_definition(&definition).await?;

        let participant_ids = definition.participant_ids();
        let expected = self.expected_replicas(&participant_ids).await?;
        let message = ParticipantMessage::new(Payload::ParticipantPrime(Prime {
            participant_definitions: Vec::new(),
        }))
        .with_composition(composition_id)
        .with_participant_list(participant_ids.iter().copied());

        let completed = match self.dispatch(composition_id, spec, expected, message).await {
            Ok(completed) => completed,
            Err(e) => {
                definition.state = DefinitionState::Primed;
                self.provider.save_definition(&definition).await?;
                return Err(e);
            }
        };

        if completed.outcome.is_success() {
            definition.state = DefinitionState::Unprimed;
            definition.element_participants.clear();
            info!("Composition definition deprimed");
        } else {
            definition.state = DefinitionState::Primed;
            warn!(outcome = %completed.outcome, "Deprime did not complete, definition left PRIMED");
        }
        self.provider.save_definition(&definition).await?;
        Ok(completed.outcome)
    }

    // ------------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------------

    /// Store a new instance of a primed definition in UNINITIALISED state.
    ///
    /// Elements without a participant are assigned the one chosen at prime
    /// time. Sensitive properties are encrypted before the instance is saved.
    #[instrument(skip_all, fields(instance_id = %instance.instance_id, composition_id = %instance.composition_id))]
    pub async fn create_instance(
        &self,
        mut instance: AutomationComposition,
    ) -> Result<AutomationComposition> {
        instance
            .validate()
            .map_err(|e| RuntimeError::validation("elements", e.to_string()))?;
        if self.provider.get_instance(instance.instance_id).await?.is_some() {
            return Err(RuntimeError::InstanceAlreadyExists {
                instance_id: instance.instance_id,
            });
        }
        let definition = self.get_definition(instance.composition_id).await?;
        require_primed(&definition)?;

        for element in instance.elements.values_mut() {
            if definition
                .service_template
                .element_template(&element.definition)
                .is_none()
            {
                return Err(RuntimeError::validation(
                    "elements",
                    format!(
                        "element {} refers to unknown definition {}",
                        element.id, element.definition
                    ),
                ));
            }
            if element.participant_id.is_nil() {
                element.participant_id = definition
                    .element_participants
                    .get(&element.definition.name)
                    .copied()
                    .ok_or_else(|| {
                        RuntimeError::validation(
                            "elements",
                            format!("no participant owns {}", element.definition),
                        )
                    })?;
            }
        }
        instance.set_state(AcState::Uninitialised);
        instance.set_ordered_state(OrderedState::Uninitialised);
        instance.deployed = false;
        instance.composition_target_id = None;
        instance.previous_composition_id = None;

        self.encryption
            .find_and_encrypt(&mut instance, &definition.service_template)?;
        self.provider.save_instance(&instance).await?;
        info!(elements = instance.elements.len(), "Automation composition created");
        Ok(instance)
    }

    /// Merge property patches into elements and push them to deployed owners.
    #[instrument(skip_all, fields(instance_id = %instance_id, elements = patches.len()))]
    pub async fn update_instance_properties(
        &self,
        instance_id: Uuid,
        patches: BTreeMap<Uuid, Map<String, Value>>,
    ) -> Result<CommandOutcome> {
        let _guard = self.acquire(instance_id)?;
        let mut instance = self.get_instance(instance_id).await?;
        let definition = self.get_definition(instance.composition_id).await?;

        for (element_id, patch) in &patches {
            let element = instance.elements.get_mut(element_id).ok_or_else(|| {
                RuntimeError::validation("elements", format!("unknown element {element_id}"))
            })?;
            for (key, value) in patch {
                element.properties.insert(key.clone(), value.clone());
            }
        }
        let index = SensitivityIndex::build(&definition.service_template);
        self.encryption.encrypt_elements(
            instance
                .elements
                .values_mut()
                .filter(|e| patches.contains_key(&e.id)),
            &index,
        )?;
        self.provider.save_instance(&instance).await?;

        let spec = CommandSpec::new(CommandKind::PropertiesUpdate)
            .instance(instance_id)
            .composition(instance.composition_id);
        if !instance.deployed {
            let completed =
                self.tracker
                    .finish_now(Uuid::new_v4(), spec, CommandOutcome::Success);
            self.remember(instance_id, &completed);
            return Ok(completed.outcome);
        }

        let updated: Vec<AcElement> = patches
            .keys()
            .filter_map(|id| instance.elements.get(id).cloned())
            .collect();
        let expected: BTreeSet<ReplicaKey> = updated.iter().filter_map(AcElement::owner).collect();
        let participant_ids: BTreeSet<Uuid> = updated.iter().map(|e| e.participant_id).collect();
        let message = ParticipantMessage::new(Payload::PropertiesUpdate(PropertiesUpdate {
            elements: updated,
        }))
        .with_instance(instance_id)
        .with_composition(instance.composition_id)
        .with_participant_list(participant_ids);

        let completed = self.dispatch(instance_id, spec, expected, message).await?;
        Ok(completed.outcome)
    }

    /// Remove an undeployed instance.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn delete_instance(&self, instance_id: Uuid) -> Result<()> {
        let _guard = self.acquire(instance_id)?;
        let instance = self.get_instance(instance_id).await?;
        if instance.deployed || instance.state != AcState::Uninitialised {
            return Err(RuntimeError::InvalidStateTransition {
                instance_id,
                from: instance.state.to_string(),
                to: "DELETED".to_string(),
            });
        }
        // An element left PASSIVE by a partial deploy must be undeployed first.
        if let Some(element) = instance
            .elements
            .values()
            .find(|e| e.state != AcState::Uninitialised)
        {
            return Err(RuntimeError::InvalidStateTransition {
                instance_id,
                from: format!("element {} {}", element.id, element.state),
                to: "DELETED".to_string(),
            });
        }
        self.provider.delete_instance(instance_id).await?;

        // Replicas holding a synced copy drop it.
        for participant_id in instance.participant_ids() {
            let message = ParticipantMessage::new(Payload::ParticipantSync(Sync {
                exclude_replicas: Vec::new(),
                restarting: false,
                delete: true,
                state: DefinitionState::Primed,
                participant_definitions: Vec::new(),
                instances: vec![instance.clone()],
            }))
            .with_participant(participant_id)
            .with_composition(instance.composition_id)
            .with_instance(instance_id);
            self.publish(&message).await?;
        }
        self.last_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&instance_id);
        info!("Automation composition deleted");
        Ok(())
    }

    /// Bring an instance to PASSIVE on its participants.
    ///
    /// A deployed instance keeps its ordered state: if its elements drifted
    /// they are re-ordered to it, so a running instance is never stopped.
    pub async fn deploy(&self, instance_id: Uuid) -> Result<CommandOutcome> {
        let instance = self.get_instance(instance_id).await?;
        if !instance.deployed {
            return self.change_state(instance_id, OrderedState::Passive).await;
        }
        if instance.is_converged() {
            let spec = CommandSpec::new(CommandKind::Deploy).instance(instance_id);
            return Ok(self.already_in_state(instance_id, spec));
        }
        match instance.ordered_state {
            OrderedState::Uninitialised => Err(RuntimeError::InvalidStateTransition {
                instance_id,
                from: instance.state.to_string(),
                to: OrderedState::Passive.to_string(),
            }),
            ordered => {
                debug!(ordered_state = %ordered, "Deployed instance drifted, re-ordering");
                self.change_state(instance_id, ordered).await
            }
        }
    }

    /// Take a PASSIVE instance back to UNINITIALISED.
    pub async fn undeploy(&self, instance_id: Uuid) -> Result<CommandOutcome> {
        self.change_state(instance_id, OrderedState::Uninitialised)
            .await
    }

    /// Move an instance one step along its lifecycle.
    ///
    /// On success every element sits in `target`. Otherwise the instance
    /// returns to its previous state and elements keep whatever state their
    /// participants reported.
    #[instrument(skip_all, fields(instance_id = %instance_id, target = %target))]
    pub async fn change_state(
        &self,
        instance_id: Uuid,
        target: OrderedState,
    ) -> Result<CommandOutcome> {
        let _guard = self.acquire(instance_id)?;
        let mut instance = self.get_instance(instance_id).await?;
        // A transitional state persisted by an interrupted command restarts
        // from where that command began.
        let from = instance.state.source();

        if from == target.as_state() && instance.is_converged() {
            let spec = CommandSpec::new(CommandKind::StateChange)
                .instance(instance_id)
                .composition(instance.composition_id)
                .expecting(target.as_state());
            return Ok(self.already_in_state(instance_id, spec));
        }
        // Same state but elements drifted: re-order without a transitional step.
        let transitional = if from == target.as_state() {
            from
        } else {
            from.transition_to(target)
                .ok_or_else(|| RuntimeError::InvalidStateTransition {
                    instance_id,
                    from: from.to_string(),
                    to: target.to_string(),
                })?
        };

        let (kind, payload) = match (from, target) {
            (AcState::Uninitialised, OrderedState::Passive) => {
                let definition = self.get_definition(instance.composition_id).await?;
                require_primed(&definition)?;
                self.assign_replicas(&mut instance).await?;
                (
                    CommandKind::Deploy,
                    Payload::AutomationCompositionDeploy(Deploy {
                        elements: instance.elements.values().cloned().collect(),
                    }),
                )
            }
            (_, OrderedState::Uninitialised) => (
                CommandKind::Undeploy,
                Payload::AutomationCompositionUndeploy(Undeploy {}),
            ),
            _ => (
                CommandKind::StateChange,
                Payload::AutomationCompositionStateChange(StateChange {
                    ordered_state: target,
                }),
            ),
        };

        let previous_ordered = instance.ordered_state;
        let previous_elements: BTreeMap<Uuid, AcState> = instance
            .elements
            .iter()
            .map(|(id, e)| (*id, e.state))
            .collect();
        instance.set_state(transitional);
        instance.set_ordered_state(target);
        self.provider.save_instance(&instance).await?;

        // A retried deploy only goes to replicas with elements short of PASSIVE.
        let expected: BTreeSet<ReplicaKey> = if matches!(kind, CommandKind::Deploy) {
            instance
                .elements
                .values()
                .filter(|e| previous_elements.get(&e.id) != Some(&AcState::Passive))
                .filter_map(AcElement::owner)
                .collect()
        } else {
            instance.owners()
        };
        let participant_ids: BTreeSet<Uuid> = if matches!(kind, CommandKind::Deploy) {
            expected.iter().map(|key| key.participant_id).collect()
        } else {
            instance.participant_ids()
        };
        let message = ParticipantMessage::new(payload)
            .with_instance(instance_id)
            .with_composition(instance.composition_id)
            .with_participant_list(participant_ids);
        let spec = CommandSpec::new(kind)
            .instance(instance_id)
            .composition(instance.composition_id)
            .expecting(target.as_state());

        let completed = match self.dispatch(instance_id, spec, expected, message).await {
            Ok(completed) => completed,
            Err(e) => {
                instance.state = from;
                instance.set_ordered_state(previous_ordered);
                for (id, state) in &previous_elements {
                    if let Some(element) = instance.elements.get_mut(id) {
                        element.state = *state;
                    }
                }
                self.provider.save_instance(&instance).await?;
                return Err(e);
            }
        };

        if completed.outcome.is_success() {
            instance.set_state(target.as_state());
            instance.deployed = target != OrderedState::Uninitialised;
            info!(state = %instance.state, "State change completed");
        } else {
            instance.state = from;
            instance.set_ordered_state(previous_ordered);
            for (id, element) in instance.elements.iter_mut() {
                if let Some(result) = completed.element_results.get(id) {
                    element.state = result.state;
                } else if let Some(state) = previous_elements.get(id) {
                    element.state = *state;
                }
            }
            warn!(
                outcome = %completed.outcome,
                state = %instance.state,
                "State change did not complete, instance state reverted"
            );
        }
        self.provider.save_instance(&instance).await?;
        Ok(completed.outcome)
    }

    // ------------------------------------------------------------------------
    // Migration, rollback, prepare
    // ------------------------------------------------------------------------

    async fn run_stages(
        &self,
        instance: &mut AutomationComposition,
        operation: StagedOperation,
        stages: &BTreeMap<u32, Vec<Uuid>>,
        elements: &BTreeMap<Uuid, AcElement>,
    ) -> Result<CommandOutcome> {
        for (stage, element_ids) in stages {
            let stage_elements: Vec<AcElement> = element_ids
                .iter()
                .filter_map(|id| elements.get(id).cloned())
                .collect();
            let expected: BTreeSet<ReplicaKey> =
                stage_elements.iter().filter_map(AcElement::owner).collect();
            let participant_ids: BTreeSet<Uuid> =
                stage_elements.iter().map(|e| e.participant_id).collect();
            info!(
                stage,
                kind = %operation.kind(),
                elements = stage_elements.len(),
                "Dispatching stage"
            );

            let message = ParticipantMessage::new(operation.payload(*stage, stage_elements))
                .with_instance(instance.instance_id)
                .with_composition(instance.composition_id)
                .with_participant_list(participant_ids);
            let spec = CommandSpec::new(operation.kind())
                .instance(instance.instance_id)
                .composition(instance.composition_id)
                .stage(*stage);
            let completed = self
                .dispatch(instance.instance_id, spec, expected, message)
                .await?;
            apply_element_results(instance, &completed.element_results);
            if !completed.outcome.is_success() {
                warn!(
                    stage,
                    outcome = %completed.outcome,
                    "Stage did not complete, later stages not dispatched"
                );
                return Ok(completed.outcome);
            }
        }
        Ok(CommandOutcome::Success)
    }

    /// Move a deployed instance to another primed definition, stage by stage.
    ///
    /// With `precheck` set participants only validate the move and nothing
    /// is changed.
    #[instrument(skip_all, fields(instance_id = %instance_id, target = %composition_target_id))]
    pub async fn migrate(
        &self,
        instance_id: Uuid,
        composition_target_id: Uuid,
        precheck: bool,
    ) -> Result<CommandOutcome> {
        let _guard = self.acquire(instance_id)?;
        let mut instance = self.get_instance(instance_id).await?;
        if !instance.deployed || !matches!(instance.state, AcState::Passive | AcState::Running) {
            return Err(RuntimeError::InvalidStateTransition {
                instance_id,
                from: instance.state.to_string(),
                to: "MIGRATING".to_string(),
            });
        }
        if instance.composition_target_id.is_some() {
            return Err(RuntimeError::validation(
                "compositionTargetId",
                "a previous migration did not finish, roll it back first",
            ));
        }
        if composition_target_id == instance.composition_id {
            return Err(RuntimeError::validation(
                "compositionTargetId",
                "instance already uses this definition",
            ));
        }
        let target = self.get_definition(composition_target_id).await?;
        require_primed(&target)?;
        let migrated = self.retarget_elements(&instance, &target)?;

        if precheck {
            let participant_ids = instance.participant_ids();
            let message = ParticipantMessage::new(Payload::AutomationCompositionMigration(
                Migrate {
                    composition_target_id,
                    precheck: true,
                    rollback: false,
                    stage: 0,
                    elements: migrated.values().cloned().collect(),
                },
            ))
            .with_instance(instance_id)
            .with_composition(instance.composition_id)
            .with_participant_list(participant_ids);
            let spec = CommandSpec::new(CommandKind::MigratePrecheck)
                .instance(instance_id)
                .composition(instance.composition_id);
            let completed = self
                .dispatch(instance_id, spec, instance.owners(), message)
                .await?;
            info!(outcome = %completed.outcome, "Migration precheck finished");
            return Ok(completed.outcome);
        }

        instance.composition_target_id = Some(composition_target_id);
        self.provider.save_instance(&instance).await?;

        let stages = stage_plan(
            &migrated,
            &target.service_template,
            NodeTemplate::migrate_stages,
        );
        let outcome = self
            .run_stages(
                &mut instance,
                StagedOperation::Migrate {
                    target: composition_target_id,
                },
                &stages,
                &migrated,
            )
            .await?;

        if outcome.is_success() {
            instance.previous_composition_id = Some(instance.composition_id);
            instance.composition_id = composition_target_id;
            instance.composition_target_id = None;
            for (id, element) in migrated {
                if let Some(current) = instance.elements.get_mut(&id) {
                    current.definition = element.definition;
                    current.properties = element.properties;
                }
            }
            info!("Migration completed");
        } else {
            warn!(outcome = %outcome, "Migration aborted, target kept for rollback");
        }
        self.provider.save_instance(&instance).await?;
        Ok(outcome)
    }

    /// Return an instance to the definition it used before its last migration.
    ///
    /// Covers both an aborted migration (target still set) and a completed
    /// one (previous definition recorded). Repeating a finished rollback
    /// reports `AlreadyInState`.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn rollback(&self, instance_id: Uuid) -> Result<CommandOutcome> {
        let _guard = self.acquire(instance_id)?;
        let mut instance = self.get_instance(instance_id).await?;
        let rollback_to = match (
            instance.composition_target_id,
            instance.previous_composition_id,
        ) {
            (Some(_), _) => instance.composition_id,
            (None, Some(previous)) => previous,
            (None, None) => {
                let spec = CommandSpec::new(CommandKind::Rollback)
                    .instance(instance_id)
                    .composition(instance.composition_id);
                return Ok(self.already_in_state(instance_id, spec));
            }
        };
        if !instance.deployed {
            return Err(RuntimeError::InvalidStateTransition {
                instance_id,
                from: instance.state.to_string(),
                to: "ROLLBACK".to_string(),
            });
        }

        let definition = self.get_definition(rollback_to).await?;
        require_primed(&definition)?;
        let elements = self.retarget_elements(&instance, &definition)?;
        let stages = stage_plan(
            &elements,
            &definition.service_template,
            NodeTemplate::migrate_stages,
        );
        let outcome = self
            .run_stages(
                &mut instance,
                StagedOperation::Rollback {
                    target: rollback_to,
                },
                &stages,
                &elements,
            )
            .await?;

        if outcome.is_success() {
            instance.composition_id = rollback_to;
            instance.composition_target_id = None;
            instance.previous_composition_id = None;
            for (id, element) in elements {
                if let Some(current) = instance.elements.get_mut(&id) {
                    current.definition = element.definition;
                    current.properties = element.properties;
                }
            }
            info!(composition_id = %rollback_to, "Rollback completed");
        } else {
            warn!(outcome = %outcome, "Rollback did not complete");
        }
        self.provider.save_instance(&instance).await?;
        Ok(outcome)
    }

    /// Run participant preparation before deploy, or a review of a deployed
    /// instance. Instance state does not change.
    #[instrument(skip_all, fields(instance_id = %instance_id, pre_deploy = pre_deploy))]
    pub async fn prepare(&self, instance_id: Uuid, pre_deploy: bool) -> Result<CommandOutcome> {
        let _guard = self.acquire(instance_id)?;
        let mut instance = self.get_instance(instance_id).await?;
        if instance.deployed == pre_deploy {
            return Err(RuntimeError::InvalidStateTransition {
                instance_id,
                from: instance.state.to_string(),
                to: (if pre_deploy { "PREPARE" } else { "REVIEW" }).to_string(),
            });
        }
        let definition = self.get_definition(instance.composition_id).await?;
        require_primed(&definition)?;

        let stages = if pre_deploy {
            self.assign_replicas(&mut instance).await?;
            self.provider.save_instance(&instance).await?;
            stage_plan(
                &instance.elements,
                &definition.service_template,
                NodeTemplate::prepare_stages,
            )
        } else {
            BTreeMap::from([(0, instance.elements.keys().copied().collect())])
        };
        let elements = instance.elements.clone();
        let outcome = self
            .run_stages(
                &mut instance,
                StagedOperation::Prepare { pre_deploy },
                &stages,
                &elements,
            )
            .await?;
        self.provider.save_instance(&instance).await?;
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------------

    /// Order every live replica of a participant into `state`.
    #[instrument(skip_all, fields(participant_id = %participant_id, state = %state))]
    pub async fn change_participant_state(
        &self,
        participant_id: Uuid,
        state: ParticipantState,
    ) -> Result<CommandOutcome> {
        let _guard = self.acquire(participant_id)?;
        let replicas = self.available_replicas(participant_id).await?;
        if replicas.is_empty() {
            return Err(RuntimeError::ParticipantNotFound { participant_id });
        }
        let spec = CommandSpec::new(CommandKind::ParticipantStateChange);
        if replicas.iter().all(|r| r.state == state) {
            return Ok(self.already_in_state(participant_id, spec));
        }

        let expected = replicas.iter().map(Participant::key).collect();
        let message = ParticipantMessage::new(Payload::ParticipantStateChange(
            ParticipantStateChange { state },
        ))
        .with_participant(participant_id);
        let completed = self
            .dispatch(participant_id, spec, expected, message)
            .await?;

        if completed.outcome.is_success() {
            for mut replica in replicas {
                replica.state = state;
                self.provider.save_participant(&replica).await?;
            }
        }
        Ok(completed.outcome)
    }

    /// Send every live participant the definitions and instances it owns.
    ///
    /// Returns the number of participants synced.
    pub async fn sync_all_participants(&self) -> Result<usize> {
        let participant_ids: BTreeSet<Uuid> = self
            .provider
            .list_participants()
            .await?
            .into_iter()
            .filter(Participant::is_available)
            .map(|p| p.participant_id)
            .collect();
        for participant_id in &participant_ids {
            self.sync_participant(*participant_id, Vec::new(), false)
                .await?;
        }
        info!(participants = participant_ids.len(), "Participants synced");
        Ok(participant_ids.len())
    }

    /// One sync message per primed definition the participant takes part in.
    async fn sync_participant(
        &self,
        participant_id: Uuid,
        exclude_replicas: Vec<Uuid>,
        restarting: bool,
    ) -> Result<()> {
        let definitions = self.provider.list_definitions().await?;
        for definition in definitions.into_iter().filter(|d| {
            d.state == DefinitionState::Primed && d.participant_ids().contains(&participant_id)
        }) {
            let instances: Vec<AutomationComposition> = self
                .provider
                .list_instances(definition.composition_id)
                .await?
                .into_iter()
                .filter(|i| i.participant_ids().contains(&participant_id))
                .collect();
            debug!(
                participant_id = %participant_id,
                composition_id = %definition.composition_id,
                instances = instances.len(),
                restarting,
                "Syncing participant"
            );
            let message = ParticipantMessage::new(Payload::ParticipantSync(Sync {
                exclude_replicas: exclude_replicas.clone(),
                restarting,
                delete: false,
                state: definition.state,
                participant_definitions: vec![ParticipantDefinition {
                    participant_id,
                    element_definitions: definition.definitions_for(participant_id),
                }],
                instances,
            }))
            .with_participant(participant_id)
            .with_composition(definition.composition_id);
            self.publish(&message).await?;
        }
        Ok(())
    }

    /// Check heartbeats as of `now`.
    ///
    /// A replica silent for longer than the participant timeout turns
    /// NOT_HEALTHY and is asked for its status. After twice the timeout it
    /// is declared TERMINATED and OFF_LINE. Returns the number of replicas
    /// whose record changed.
    pub async fn supervise_participants(&self, now: DateTime<Utc>) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.participant_timeout)
            .map_err(|e| RuntimeError::validation("participant_timeout", e.to_string()))?;
        let mut changed = 0;
        for mut participant in self.provider.list_participants().await? {
            if participant.state == ParticipantState::Terminated {
                continue;
            }
            let silence = now - participant.last_heartbeat;
            if silence > timeout * 2 {
                warn!(
                    participant_id = %participant.participant_id,
                    replica_id = %participant.replica_id,
                    silence_ms = silence.num_milliseconds(),
                    "Participant lost, marking TERMINATED"
                );
                participant.state = ParticipantState::Terminated;
                participant.health = HealthStatus::OffLine;
                self.provider.save_participant(&participant).await?;
                changed += 1;
            } else if silence > timeout && participant.health != HealthStatus::NotHealthy {
                warn!(
                    participant_id = %participant.participant_id,
                    replica_id = %participant.replica_id,
                    silence_ms = silence.num_milliseconds(),
                    "Participant heartbeat overdue, requesting status"
                );
                participant.health = HealthStatus::NotHealthy;
                self.provider.save_participant(&participant).await?;
                let request = ParticipantMessage::new(Payload::ParticipantStatusReq(StatusReq {}))
                    .with_replica(participant.participant_id, participant.replica_id);
                self.publish(&request).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------------

    /// Handle one message published by a participant.
    #[instrument(skip_all, fields(message_type = message.message_type(), message_id = %message.message_id()))]
    pub async fn handle_message(&self, message: ParticipantMessage) -> Result<()> {
        if !message.payload.is_from_participant() {
            debug!("Ignoring runtime-originated message");
            return Ok(());
        }
        let envelope = &message.envelope;
        let Some((participant_id, replica_id)) = envelope.participant_id.zip(envelope.replica_id)
        else {
            warn!("Participant message without sender, dropped");
            return Ok(());
        };
        let sender = ReplicaKey::new(participant_id, replica_id);

        match &message.payload {
            Payload::ParticipantRegister(register) => {
                self.handle_register(envelope, sender, register).await
            }
            Payload::ParticipantDeregister(_) => self.handle_deregister(envelope, sender).await,
            Payload::ParticipantStatus(status) => self.handle_status(sender, status).await,
            payload => {
                self.handle_ack(sender, payload);
                Ok(())
            }
        }
    }

    async fn handle_register(
        &self,
        request: &Envelope,
        sender: ReplicaKey,
        register: &Register,
    ) -> Result<()> {
        let previous = self.provider.get_participant(sender).await?;
        let restarting = previous.is_some();
        let mut participant = previous.unwrap_or_else(|| Participant::new(sender, Vec::new()));
        participant.supported_element_types = register.supported_element_types.clone();
        participant.state = ParticipantState::Passive;
        participant.health = HealthStatus::Healthy;
        participant.last_heartbeat = Utc::now();
        self.provider.save_participant(&participant).await?;
        info!(
            participant_id = %sender.participant_id,
            replica_id = %sender.replica_id,
            restarting,
            "Participant registered"
        );

        let reply = ParticipantMessage::new(Payload::ParticipantRegisterAck(Ack::success(
            request.message_id,
            "Participant registered",
        )))
        .with_replica(sender.participant_id, sender.replica_id);
        self.publish(&reply).await?;

        let siblings: Vec<Uuid> = self
            .available_replicas(sender.participant_id)
            .await?
            .into_iter()
            .map(|p| p.replica_id)
            .filter(|r| *r != sender.replica_id)
            .collect();
        self.sync_participant(sender.participant_id, siblings, restarting)
            .await
    }

    async fn handle_deregister(&self, request: &Envelope, sender: ReplicaKey) -> Result<()> {
        if let Some(mut participant) = self.provider.get_participant(sender).await? {
            participant.state = ParticipantState::Terminated;
            participant.health = HealthStatus::OffLine;
            self.provider.save_participant(&participant).await?;
        }
        info!(
            participant_id = %sender.participant_id,
            replica_id = %sender.replica_id,
            "Participant deregistered"
        );
        let reply = ParticipantMessage::new(Payload::ParticipantDeregisterAck(Ack::success(
            request.message_id,
            "Participant deregistered",
        )))
        .with_replica(sender.participant_id, sender.replica_id);
        self.publish(&reply).await
    }

    async fn handle_status(&self, sender: ReplicaKey, status: &Status) -> Result<()> {
        let mut participant = match self.provider.get_participant(sender).await? {
            Some(participant) => participant,
            None => {
                info!(replica = %sender, "Status from unregistered replica, recording it");
                Participant::new(sender, Vec::new())
            }
        };
        if participant.state == ParticipantState::Terminated
            && status.state != ParticipantState::Terminated
        {
            info!(replica = %sender, "Participant back online");
        }
        participant.last_heartbeat = Utc::now();
        participant.health = HealthStatus::Healthy;
        participant.state = status.state;
        self.provider.save_participant(&participant).await?;

        for info in &status.instances {
            let completed = self.tracker.record_status(sender, info);
            if !completed.is_empty() {
                debug!(
                    instance_id = %info.automation_composition_id,
                    commands = completed.len(),
                    "Status report completed commands"
                );
            }
            if !info.element_info.is_empty() {
                self.record_element_info(sender, info).await?;
            }
        }
        Ok(())
    }

    /// Store use state, operational state and out-properties reported for
    /// elements the sender holds.
    async fn record_element_info(&self, sender: ReplicaKey, info: &InstanceInfo) -> Result<()> {
        let instance_id = info.automation_composition_id;
        let Some(mut instance) = self.provider.get_instance(instance_id).await? else {
            debug!(
                instance_id = %instance_id,
                replica = %sender,
                "Element info for unknown instance dropped"
            );
            return Ok(());
        };
        let mut changed = 0;
        for (element_id, reported) in &info.element_info {
            match instance.elements.get_mut(element_id) {
                Some(element)
                    if element.is_held_by(sender.participant_id, sender.replica_id) =>
                {
                    if element.info != *reported {
                        element.info = reported.clone();
                        changed += 1;
                    }
                }
                _ => warn!(
                    instance_id = %instance_id,
                    element_id = %element_id,
                    replica = %sender,
                    "Element info from a replica not holding the element dropped"
                ),
            }
        }
        if changed > 0 {
            self.provider.save_instance(&instance).await?;
            debug!(instance_id = %instance_id, changed, "Element info updated");
        }
        Ok(())
    }

    fn handle_ack(&self, sender: ReplicaKey, payload: &Payload) {
        let Some(ack) = payload.ack() else {
            return;
        };
        let Some(command_id) = ack.response_to else {
            warn!(replica = %sender, "Ack without responseTo dropped");
            return;
        };
        let element_results = payload
            .instance_ack()
            .map(|a| a.element_results.clone())
            .unwrap_or_default();
        let disposition = self
            .tracker
            .record_ack(command_id, sender, ack, &element_results);
        debug!(command_id = %command_id, replica = %sender, ?disposition, "Ack handled");
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current view of an instance and its last command.
    pub async fn instance_view(&self, instance_id: Uuid) -> Result<InstanceView> {
        let instance = self.get_instance(instance_id).await?;
        let last_command = self
            .last_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance_id)
            .cloned();
        Ok(InstanceView {
            instance_id,
            composition_id: instance.composition_id,
            composition_target_id: instance.composition_target_id,
            previous_composition_id: instance.previous_composition_id,
            state: instance.state,
            ordered_state: instance.ordered_state,
            deployed: instance.deployed,
            converged: instance.is_converged(),
            elements: instance
                .elements
                .values()
                .map(|e| ElementView {
                    element_id: e.id,
                    definition: e.definition.clone(),
                    participant_id: e.participant_id,
                    replica_id: e.replica_id,
                    state: e.state,
                    ordered_state: e.ordered_state,
                    info: e.info.clone(),
                })
                .collect(),
            last_command,
        })
    }

    /// Last command issued against an instance, definition or participant.
    pub fn last_command(&self, target_id: Uuid) -> Option<LastCommand> {
        self.last_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target_id)
            .cloned()
    }

    /// Status of a command by its message id.
    pub fn command_outcome(&self, command_id: Uuid) -> Option<CommandStatus> {
        self.tracker.status(command_id)
    }
}
