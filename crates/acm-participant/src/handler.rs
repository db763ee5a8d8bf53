// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Participant side of the coordination protocol.
//!
//! [`ParticipantHandler::handle`] drops every message that does not apply to
//! this replica, drives the [`ElementListener`] for the elements it holds and
//! answers each command with exactly one ack on the runtime topic.
//!
//! Listener calls run outside the cache lock on decrypted copies of the
//! elements; the cache keeps the values as received.

use std::collections::BTreeMap;
use std::sync::Arc;

use acm_protocol::bus::{MessageBus, RUNTIME_TOPIC};
use acm_protocol::encryption::EncryptionService;
use acm_protocol::messages::{
    Ack, Deploy, Deregister, ElementResult, Envelope, InstanceAck, Migrate, ParticipantMessage,
    ParticipantStateAck, Payload, Prepare, Prime, PropertiesUpdate, Register, Status, Sync,
};
use acm_protocol::model::{
    AcElement, AcState, AutomationComposition, DefinitionState, ElementDefinition, ElementInfo,
    HealthStatus, OrderedState, ParticipantDefinition, ParticipantState, ReplicaKey,
    SupportedElementType,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::ParticipantCache;
use crate::config::ParticipantConfig;
use crate::error::{ParticipantError, Result};
use crate::listener::ElementListener;

// ============================================================================
// Element commands
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum ElementCommand {
    Deploy,
    Undeploy,
    StateChange(OrderedState),
    Update,
    Migrate {
        target: Uuid,
        stage: u32,
        rollback: bool,
    },
    MigratePrecheck {
        target: Uuid,
    },
    Prepare {
        pre_deploy: bool,
        stage: u32,
    },
}

impl ElementCommand {
    fn label(&self) -> &'static str {
        match self {
            Self::Deploy => "Deploy",
            Self::Undeploy => "Undeploy",
            Self::StateChange(_) => "State change",
            Self::Update => "Properties update",
            Self::Migrate {
                rollback: false, ..
            } => "Migration",
            Self::Migrate { rollback: true, .. } => "Rollback",
            Self::MigratePrecheck { .. } => "Migration precheck",
            Self::Prepare {
                pre_deploy: true, ..
            } => "Prepare",
            Self::Prepare {
                pre_deploy: false, ..
            } => "Review",
        }
    }
}

/// Per-element listener outcome, keyed by element id.
type Outcomes = BTreeMap<Uuid, std::result::Result<(), String>>;

fn summarize(command: ElementCommand, outcomes: &Outcomes) -> (bool, String) {
    let failed: Vec<&str> = outcomes
        .values()
        .filter_map(|o| o.as_ref().err())
        .map(String::as_str)
        .collect();
    if failed.is_empty() {
        (
            true,
            format!("{} completed on {} element(s)", command.label(), outcomes.len()),
        )
    } else {
        (
            false,
            format!(
                "{} failed on {} of {} element(s): {}",
                command.label(),
                failed.len(),
                outcomes.len(),
                failed.join("; ")
            ),
        )
    }
}

/// Elements missing from `outcomes` were skipped and count as successful.
fn element_result(state: AcState, outcome: Option<&std::result::Result<(), String>>) -> ElementResult {
    match outcome {
        Some(Err(message)) => ElementResult {
            state,
            result: false,
            message: message.clone(),
        },
        _ => ElementResult {
            state,
            result: true,
            message: String::new(),
        },
    }
}

fn ack(request: &Envelope, result: bool, message: impl Into<String>) -> Ack {
    if result {
        Ack::success(request.message_id, message)
    } else {
        Ack::failure(request.message_id, message)
    }
}

fn own_definitions(
    participant_id: Uuid,
    definitions: Vec<ParticipantDefinition>,
) -> Vec<ElementDefinition> {
    definitions
        .into_iter()
        .filter(|d| d.participant_id == participant_id)
        .flat_map(|d| d.element_definitions)
        .collect()
}

// ============================================================================
// Handler
// ============================================================================

/// Handles runtime commands for one participant replica.
pub struct ParticipantHandler {
    key: ReplicaKey,
    supported_element_types: Vec<SupportedElementType>,
    cache: Mutex<ParticipantCache>,
    listener: Arc<dyn ElementListener>,
    bus: Arc<dyn MessageBus>,
    encryption: EncryptionService,
}

impl std::fmt::Debug for ParticipantHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantHandler")
            .field("key", &self.key)
            .field("supported_element_types", &self.supported_element_types)
            .field("listener", &"...")
            .field("bus", &"...")
            .field("encryption", &self.encryption)
            .finish()
    }
}

impl ParticipantHandler {
    /// Fails when the configured pass phrase cannot be used.
    pub fn new(
        config: &ParticipantConfig,
        listener: Arc<dyn ElementListener>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self> {
        let encryption = EncryptionService::from_settings(
            config.encryption_pass_phrase.is_some(),
            config.encryption_pass_phrase.as_deref(),
        )?;
        let key = config.key();
        Ok(Self {
            key,
            supported_element_types: config.supported_element_types.clone(),
            cache: Mutex::new(ParticipantCache::new(key)),
            listener,
            bus,
            encryption,
        })
    }

    pub fn key(&self) -> ReplicaKey {
        self.key
    }

    pub async fn state(&self) -> ParticipantState {
        self.cache.lock().await.state()
    }

    /// Cached copy of an instance, restricted to the elements held here.
    pub async fn instance(&self, instance_id: Uuid) -> Option<AutomationComposition> {
        self.cache.lock().await.instance(instance_id).cloned()
    }

    pub async fn is_primed(&self, composition_id: Uuid) -> bool {
        self.cache.lock().await.is_primed(composition_id)
    }

    pub async fn status(&self, include_definitions: bool) -> Status {
        self.cache.lock().await.status(include_definitions)
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    async fn publish(&self, payload: Payload) -> Result<()> {
        let message = ParticipantMessage::new(payload)
            .with_replica(self.key.participant_id, self.key.replica_id);
        self.bus.publish(RUNTIME_TOPIC, &message).await?;
        Ok(())
    }

    async fn reply(&self, request: &Envelope, payload: Payload) -> Result<()> {
        let message = ParticipantMessage::reply(
            request,
            self.key.participant_id,
            self.key.replica_id,
            payload,
        );
        debug!(message_type = message.message_type(), "Sending ack");
        self.bus.publish(RUNTIME_TOPIC, &message).await?;
        Ok(())
    }

    /// Announce this replica and the element types it supports.
    pub async fn register(&self) -> Result<()> {
        info!(replica = %self.key, "Registering participant");
        self.publish(Payload::ParticipantRegister(Register {
            supported_element_types: self.supported_element_types.clone(),
        }))
        .await
    }

    pub async fn deregister(&self) -> Result<()> {
        info!(replica = %self.key, "Deregistering participant");
        self.publish(Payload::ParticipantDeregister(Deregister {}))
            .await
    }

    /// Report participant state and instance states.
    pub async fn send_status(&self, include_definitions: bool) -> Result<()> {
        let status = self.status(include_definitions).await;
        self.publish(Payload::ParticipantStatus(status)).await
    }

    /// Report use state, operational state and out-properties of a held
    /// element outside of any command.
    ///
    /// The runtime receives them in a status report carrying the element's
    /// instance.
    #[instrument(skip(self, info))]
    pub async fn send_element_info(
        &self,
        instance_id: Uuid,
        element_id: Uuid,
        info: ElementInfo,
    ) -> Result<()> {
        let status = {
            let mut cache = self.cache.lock().await;
            let summary = cache
                .set_element_info(instance_id, element_id, info)
                .ok_or(ParticipantError::UnknownElement {
                    instance_id,
                    element_id,
                })?;
            Status {
                state: cache.state(),
                health: HealthStatus::Healthy,
                instances: vec![summary],
                definitions: Vec::new(),
            }
        };
        debug!("Sending element info");
        self.publish(Payload::ParticipantStatus(status)).await
    }

    // ------------------------------------------------------------------------
    // Listener invocation
    // ------------------------------------------------------------------------

    async fn invoke(
        &self,
        instance_id: Uuid,
        element: &AcElement,
        command: ElementCommand,
    ) -> Result<()> {
        let mut plain = element.clone();
        self.encryption.decrypt_properties(&mut plain.properties)?;
        let listener = &self.listener;
        match command {
            ElementCommand::Deploy => listener.deploy(instance_id, &plain).await,
            ElementCommand::Undeploy => listener.undeploy(instance_id, &plain).await,
            ElementCommand::StateChange(ordered_state) => {
                listener
                    .state_change(instance_id, &plain, ordered_state)
                    .await
            }
            ElementCommand::Update => listener.update(instance_id, &plain).await,
            ElementCommand::Migrate {
                target,
                stage,
                rollback,
            } => {
                listener
                    .migrate(instance_id, &plain, target, stage, rollback)
                    .await
            }
            ElementCommand::MigratePrecheck { target } => {
                listener.migrate_precheck(instance_id, &plain, target).await
            }
            ElementCommand::Prepare { pre_deploy, stage } => {
                listener
                    .prepare(instance_id, &plain, pre_deploy, stage)
                    .await
            }
        }
    }

    async fn run_elements(
        &self,
        instance_id: Uuid,
        elements: &[AcElement],
        command: ElementCommand,
    ) -> Outcomes {
        let mut outcomes = BTreeMap::new();
        for element in elements {
            let outcome = self
                .invoke(instance_id, element, command)
                .await
                .map_err(|e| {
                    warn!(
                        element_id = %element.id,
                        command = command.label(),
                        error = %e,
                        "Element operation failed"
                    );
                    e.to_string()
                });
            outcomes.insert(element.id, outcome);
        }
        outcomes
    }

    async fn send_instance_ack(
        &self,
        request: &Envelope,
        wrap: fn(InstanceAck) -> Payload,
        ack: InstanceAck,
    ) -> Result<()> {
        self.reply(request, wrap(ack)).await
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Handle one message from the participant topic.
    #[instrument(skip_all, fields(message_type = message.message_type(), message_id = %message.message_id()))]
    pub async fn handle(&self, message: ParticipantMessage) -> Result<()> {
        if message.payload.is_from_participant() {
            return Ok(());
        }
        if !message.applies_to(self.key.participant_id, self.key.replica_id) {
            debug!("Message not addressed to this replica");
            return Ok(());
        }

        let ParticipantMessage { envelope, payload } = message;
        match payload {
            Payload::ParticipantRegisterAck(ack) => self.handle_register_ack(&ack).await,
            Payload::ParticipantDeregisterAck(_) => {
                self.cache
                    .lock()
                    .await
                    .set_state(ParticipantState::Terminated);
                info!("Participant deregistered");
                Ok(())
            }
            Payload::ParticipantStatusReq(_) => self.send_status(true).await,
            Payload::ParticipantPrime(prime) => self.handle_prime(&envelope, prime).await,
            Payload::ParticipantSync(sync) => self.handle_sync(&envelope, sync).await,
            Payload::ParticipantStateChange(change) => {
                self.handle_participant_state_change(&envelope, change.state)
                    .await
            }
            Payload::AutomationCompositionDeploy(deploy) => {
                self.handle_deploy(&envelope, deploy).await
            }
            Payload::AutomationCompositionUndeploy(_) => self.handle_undeploy(&envelope).await,
            Payload::AutomationCompositionStateChange(change) => {
                self.handle_state_change(&envelope, change.ordered_state)
                    .await
            }
            Payload::PropertiesUpdate(update) => {
                self.handle_properties_update(&envelope, update).await
            }
            Payload::AutomationCompositionMigration(migrate) => {
                self.handle_migrate(&envelope, migrate).await
            }
            Payload::AutomationCompositionPrepare(prepare) => {
                self.handle_prepare(&envelope, prepare).await
            }
            other => {
                debug!(message_type = other.message_type(), "Unhandled message");
                Ok(())
            }
        }
    }

    async fn handle_register_ack(&self, ack: &Ack) -> Result<()> {
        if !ack.result {
            warn!(message = %ack.message, "Registration rejected");
            return Ok(());
        }
        {
            let mut cache = self.cache.lock().await;
            if matches!(
                cache.state(),
                ParticipantState::Unknown | ParticipantState::Terminated
            ) {
                cache.set_state(ParticipantState::Passive);
            }
            cache.set_health(HealthStatus::Healthy);
        }
        info!(replica = %self.key, "Participant registered");
        self.send_status(true).await
    }

    async fn handle_participant_state_change(
        &self,
        request: &Envelope,
        state: ParticipantState,
    ) -> Result<()> {
        let (ack, current) = {
            let mut cache = self.cache.lock().await;
            let from = cache.state();
            let ack = if from == state {
                Ack::success(
                    request.message_id,
                    format!("Participant already in state {}", state),
                )
            } else if from == ParticipantState::Terminated {
                Ack::failure(
                    request.message_id,
                    format!("Participant {} is TERMINATED", self.key.participant_id),
                )
            } else {
                cache.set_state(state);
                info!(from = %from, to = %state, "Participant state changed");
                Ack::success(
                    request.message_id,
                    format!("Participant state changed from {} to {}", from, state),
                )
            };
            (ack, cache.state())
        };
        self.reply(
            request,
            Payload::ParticipantStateChangeAck(ParticipantStateAck {
                ack,
                state: current,
            }),
        )
        .await
    }

    async fn handle_prime(&self, request: &Envelope, prime: Prime) -> Result<()> {
        let Some(composition_id) = request.composition_id else {
            warn!("Prime without composition id dropped");
            return Ok(());
        };

        let ack = if prime.participant_definitions.is_empty() {
            if !self.is_primed(composition_id).await {
                Ack::success(request.message_id, "Already deprimed or never primed")
            } else {
                match self.listener.deprime(composition_id).await {
                    Ok(()) => {
                        self.cache
                            .lock()
                            .await
                            .remove_definitions(composition_id);
                        info!(composition_id = %composition_id, "Composition deprimed");
                        Ack::success(request.message_id, "Deprimed")
                    }
                    Err(e) => {
                        warn!(composition_id = %composition_id, error = %e, "Deprime failed");
                        Ack::failure(request.message_id, e.to_string())
                    }
                }
            }
        } else {
            let definitions =
                own_definitions(self.key.participant_id, prime.participant_definitions);
            match self.listener.prime(composition_id, &definitions).await {
                Ok(()) => {
                    let count = definitions.len();
                    self.cache
                        .lock()
                        .await
                        .set_definitions(composition_id, definitions);
                    info!(composition_id = %composition_id, definitions = count, "Composition primed");
                    Ack::success(
                        request.message_id,
                        format!("Primed {} element definition(s)", count),
                    )
                }
                Err(e) => {
                    warn!(composition_id = %composition_id, error = %e, "Prime failed");
                    Ack::failure(request.message_id, e.to_string())
                }
            }
        };
        self.reply(request, Payload::ParticipantPrimeAck(ack)).await
    }

    async fn handle_sync(&self, request: &Envelope, sync: Sync) -> Result<()> {
        if sync.exclude_replicas.contains(&self.key.replica_id) {
            debug!("Sync excludes this replica");
            return Ok(());
        }
        let Some(composition_id) = request.composition_id else {
            warn!("Sync without composition id dropped");
            return Ok(());
        };

        {
            let mut cache = self.cache.lock().await;
            if sync.delete {
                for instance in &sync.instances {
                    cache.remove_instance(instance.instance_id);
                }
                if sync.state == DefinitionState::Unprimed {
                    cache.remove_definitions(composition_id);
                }
                info!(
                    composition_id = %composition_id,
                    instances = sync.instances.len(),
                    "Synced deletion"
                );
            } else {
                match sync.state {
                    DefinitionState::Primed => {
                        let definitions = own_definitions(
                            self.key.participant_id,
                            sync.participant_definitions,
                        );
                        cache.set_definitions(composition_id, definitions);
                    }
                    DefinitionState::Unprimed => {
                        cache.remove_definitions(composition_id);
                    }
                    DefinitionState::Priming | DefinitionState::Depriming => {}
                }
                let restored = cache.replace_instances(composition_id, sync.instances);
                info!(
                    composition_id = %composition_id,
                    restored,
                    restarting = sync.restarting,
                    "Participant synced"
                );
            }
        }
        self.send_status(true).await
    }

    async fn handle_deploy(&self, request: &Envelope, deploy: Deploy) -> Result<()> {
        let (Some(instance_id), Some(composition_id)) =
            (request.automation_composition_id, request.composition_id)
        else {
            warn!("Deploy without instance or composition id dropped");
            return Ok(());
        };
        let (own, cached) = {
            let cache = self.cache.lock().await;
            (
                cache.own_elements(&deploy.elements),
                cache.instance(instance_id).cloned(),
            )
        };
        if own.is_empty() {
            debug!(instance_id = %instance_id, "No elements held by this replica");
            return Ok(());
        }
        if let Some(cached) = &cached
            && cached.deployed
        {
            let message = format!(
                "Automation composition {} already defined on participant {}",
                instance_id, self.key.participant_id
            );
            warn!("{}", message);
            let ack = InstanceAck {
                ack: Ack::failure(request.message_id, message),
                state: Some(cached.state),
                stage: None,
                element_results: BTreeMap::new(),
            };
            return self
                .send_instance_ack(request, Payload::AutomationCompositionDeployAck, ack)
                .await;
        }

        // A cached, undeployed copy comes from a sync or an earlier failed deploy.
        let mut instance = cached.unwrap_or_else(|| {
            let mut instance = AutomationComposition::new(composition_id, "", "");
            instance.instance_id = instance_id;
            instance
        });
        instance.composition_id = composition_id;
        for element in own {
            instance.elements.insert(element.id, element);
        }
        instance.set_ordered_state(OrderedState::Passive);

        let pending: Vec<AcElement> = instance
            .elements
            .values()
            .filter(|e| e.state != AcState::Passive)
            .cloned()
            .collect();
        let command = ElementCommand::Deploy;
        let outcomes = self.run_elements(instance_id, &pending, command).await;

        let mut element_results = BTreeMap::new();
        for (id, element) in instance.elements.iter_mut() {
            let outcome = outcomes.get(id);
            element.state = match outcome {
                Some(Err(_)) => AcState::Uninitialised,
                _ => AcState::Passive,
            };
            element_results.insert(*id, element_result(element.state, outcome));
        }
        let (ok, message) = summarize(command, &outcomes);
        instance.state = if ok {
            AcState::Passive
        } else {
            AcState::Uninitialised
        };
        instance.deployed = ok;
        let state = instance.state;
        self.cache.lock().await.put_instance(instance);
        info!(instance_id = %instance_id, ok, "Deploy handled");

        let ack = InstanceAck {
            ack: ack(request, ok, message),
            state: Some(state),
            stage: None,
            element_results,
        };
        self.send_instance_ack(request, Payload::AutomationCompositionDeployAck, ack)
            .await
    }

    async fn handle_undeploy(&self, request: &Envelope) -> Result<()> {
        let Some(instance_id) = request.automation_composition_id else {
            warn!("Undeploy without instance id dropped");
            return Ok(());
        };
        let Some(mut instance) = self.instance(instance_id).await else {
            debug!(instance_id = %instance_id, "Instance not held by this replica");
            return Ok(());
        };
        instance.set_ordered_state(OrderedState::Uninitialised);

        let pending: Vec<AcElement> = instance
            .elements
            .values()
            .filter(|e| e.state != AcState::Uninitialised)
            .cloned()
            .collect();
        let command = ElementCommand::Undeploy;
        let outcomes = self.run_elements(instance_id, &pending, command).await;

        let mut element_results = BTreeMap::new();
        for (id, element) in instance.elements.iter_mut() {
            let outcome = outcomes.get(id);
            if matches!(outcome, Some(Ok(()))) {
                element.state = AcState::Uninitialised;
            }
            element_results.insert(*id, element_result(element.state, outcome));
        }
        let (ok, message) = if pending.is_empty() {
            (
                true,
                format!("Automation composition already in state {}", AcState::Uninitialised),
            )
        } else {
            summarize(command, &outcomes)
        };

        let state = if ok {
            self.cache.lock().await.remove_instance(instance_id);
            AcState::Uninitialised
        } else {
            let state = instance.state;
            self.cache.lock().await.put_instance(instance);
            state
        };
        info!(instance_id = %instance_id, ok, "Undeploy handled");

        let ack = InstanceAck {
            ack: ack(request, ok, message),
            state: Some(state),
            stage: None,
            element_results,
        };
        self.send_instance_ack(request, Payload::AutomationCompositionUndeployAck, ack)
            .await
    }

    async fn handle_state_change(
        &self,
        request: &Envelope,
        ordered_state: OrderedState,
    ) -> Result<()> {
        if ordered_state == OrderedState::Uninitialised {
            return self.handle_undeploy(request).await;
        }
        let Some(instance_id) = request.automation_composition_id else {
            warn!("State change without instance id dropped");
            return Ok(());
        };
        let Some(mut instance) = self.instance(instance_id).await else {
            debug!(instance_id = %instance_id, "Instance not held by this replica");
            return Ok(());
        };

        let target = ordered_state.as_state();
        let from = instance.state;
        instance.set_ordered_state(ordered_state);
        let pending: Vec<AcElement> = instance
            .elements
            .values()
            .filter(|e| e.state != target)
            .cloned()
            .collect();
        let command = ElementCommand::StateChange(ordered_state);
        let outcomes = self.run_elements(instance_id, &pending, command).await;

        let mut element_results = BTreeMap::new();
        for (id, element) in instance.elements.iter_mut() {
            let outcome = outcomes.get(id);
            if matches!(outcome, Some(Ok(()))) {
                element.state = target;
            }
            element_results.insert(*id, element_result(element.state, outcome));
        }
        let (ok, message) = match summarize(command, &outcomes) {
            (true, _) if pending.is_empty() && from == target => (
                true,
                format!("Automation composition already in state {}", target),
            ),
            (true, _) => (
                true,
                format!(
                    "Automation composition state changed from {} to {}",
                    from, target
                ),
            ),
            failed => failed,
        };
        if ok {
            instance.state = target;
        }
        let state = instance.state;
        self.cache.lock().await.put_instance(instance);
        info!(instance_id = %instance_id, from = %from, to = %target, ok, "State change handled");

        let ack = InstanceAck {
            ack: ack(request, ok, message),
            state: Some(state),
            stage: None,
            element_results,
        };
        self.send_instance_ack(request, Payload::AutomationCompositionStateChangeAck, ack)
            .await
    }

    async fn handle_properties_update(
        &self,
        request: &Envelope,
        update: PropertiesUpdate,
    ) -> Result<()> {
        let Some(instance_id) = request.automation_composition_id else {
            warn!("Properties update without instance id dropped");
            return Ok(());
        };
        let (own, cached) = {
            let cache = self.cache.lock().await;
            (
                cache.own_elements(&update.elements),
                cache.instance(instance_id).cloned(),
            )
        };
        let Some(mut instance) = cached else {
            debug!(instance_id = %instance_id, "Instance not held by this replica");
            return Ok(());
        };
        if own.is_empty() {
            return Ok(());
        }

        let command = ElementCommand::Update;
        let outcomes = self.run_elements(instance_id, &own, command).await;
        let mut element_results = BTreeMap::new();
        for element in own {
            let outcome = outcomes.get(&element.id);
            let state = match instance.elements.get_mut(&element.id) {
                Some(current) => {
                    if matches!(outcome, Some(Ok(()))) {
                        current.properties = element.properties;
                    }
                    current.state
                }
                None => element.state,
            };
            element_results.insert(element.id, element_result(state, outcome));
        }
        let (ok, message) = summarize(command, &outcomes);
        let state = instance.state;
        self.cache.lock().await.put_instance(instance);

        let ack = InstanceAck {
            ack: ack(request, ok, message),
            state: Some(state),
            stage: None,
            element_results,
        };
        self.send_instance_ack(request, Payload::PropertiesUpdateAck, ack)
            .await
    }

    async fn handle_migrate(&self, request: &Envelope, migrate: Migrate) -> Result<()> {
        let Some(instance_id) = request.automation_composition_id else {
            warn!("Migration without instance id dropped");
            return Ok(());
        };
        let (own, cached) = {
            let cache = self.cache.lock().await;
            (
                cache.own_elements(&migrate.elements),
                cache.instance(instance_id).cloned(),
            )
        };
        if own.is_empty() {
            debug!(instance_id = %instance_id, "No elements held by this replica");
            return Ok(());
        }
        let target = migrate.composition_target_id;

        if migrate.precheck {
            let command = ElementCommand::MigratePrecheck { target };
            let outcomes = self.run_elements(instance_id, &own, command).await;
            let element_results = own
                .iter()
                .map(|e| (e.id, element_result(e.state, outcomes.get(&e.id))))
                .collect();
            let (ok, message) = summarize(command, &outcomes);
            let ack = InstanceAck {
                ack: ack(request, ok, message),
                state: cached.map(|i| i.state),
                stage: None,
                element_results,
            };
            return self
                .send_instance_ack(request, Payload::AutomationCompositionMigrationAck, ack)
                .await;
        }

        let Some(mut instance) = cached else {
            let message = format!(
                "Automation composition {} is not deployed on participant {}",
                instance_id, self.key.participant_id
            );
            warn!("{}", message);
            let ack = InstanceAck {
                ack: Ack::failure(request.message_id, message),
                state: None,
                stage: Some(migrate.stage),
                element_results: BTreeMap::new(),
            };
            return self
                .send_instance_ack(request, Payload::AutomationCompositionMigrationAck, ack)
                .await;
        };

        let command = ElementCommand::Migrate {
            target,
            stage: migrate.stage,
            rollback: migrate.rollback,
        };
        let outcomes = self.run_elements(instance_id, &own, command).await;
        let mut element_results = BTreeMap::new();
        for element in own {
            let outcome = outcomes.get(&element.id);
            let state = match instance.elements.get_mut(&element.id) {
                Some(current) => {
                    if matches!(outcome, Some(Ok(()))) {
                        current.definition = element.definition;
                        current.properties = element.properties;
                    }
                    current.state
                }
                None => element.state,
            };
            element_results.insert(element.id, element_result(state, outcome));
        }
        let (ok, message) = summarize(command, &outcomes);
        if ok && instance.composition_id != target {
            instance.previous_composition_id = Some(instance.composition_id);
            instance.composition_id = target;
        }
        let state = instance.state;
        self.cache.lock().await.put_instance(instance);
        info!(
            instance_id = %instance_id,
            stage = migrate.stage,
            rollback = migrate.rollback,
            ok,
            "Migration stage handled"
        );

        let ack = InstanceAck {
            ack: ack(request, ok, message),
            state: Some(state),
            stage: Some(migrate.stage),
            element_results,
        };
        self.send_instance_ack(request, Payload::AutomationCompositionMigrationAck, ack)
            .await
    }

    async fn handle_prepare(&self, request: &Envelope, prepare: Prepare) -> Result<()> {
        let Some(instance_id) = request.automation_composition_id else {
            warn!("Prepare without instance id dropped");
            return Ok(());
        };
        let (own, cached_state) = {
            let cache = self.cache.lock().await;
            (
                cache.own_elements(&prepare.elements),
                cache.instance(instance_id).map(|i| i.state),
            )
        };
        if own.is_empty() {
            debug!(instance_id = %instance_id, "No elements held by this replica");
            return Ok(());
        }

        let command = ElementCommand::Prepare {
            pre_deploy: prepare.pre_deploy,
            stage: prepare.stage,
        };
        let outcomes = self.run_elements(instance_id, &own, command).await;
        let element_results = own
            .iter()
            .map(|e| (e.id, element_result(e.state, outcomes.get(&e.id))))
            .collect();
        let (ok, message) = summarize(command, &outcomes);
        info!(
            instance_id = %instance_id,
            stage = prepare.stage,
            pre_deploy = prepare.pre_deploy,
            ok,
            "Prepare stage handled"
        );

        let ack = InstanceAck {
            ack: ack(request, ok, message),
            state: Some(cached_state.unwrap_or(AcState::Uninitialised)),
            stage: Some(prepare.stage),
            element_results,
        };
        self.send_instance_ack(request, Payload::AutomationCompositionPrepareAck, ack)
            .await
    }
}
