// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Commands whose replicas stay silent end as Incomplete, not Failed.

mod common;

use std::sync::Arc;
use std::time::Duration;

use acm_participant::SimulatorListener;
use acm_protocol::InMemoryBus;
use acm_protocol::model::{
    AcState, CompositionDefinition, DefinitionState, HealthStatus, Participant, ParticipantState,
    ReplicaKey, SupportedElementType,
};
use acm_runtime::{AcmRuntime, CommandOutcome};
use common::*;
use uuid::Uuid;

const BUDGET: Duration = Duration::from_secs(2);

/// Runtime with only the K8s participant running, plus an HTTP replica that
/// is registered in storage but never answers.
async fn start_with_silent_replica() -> (Arc<InMemoryBus>, AcmRuntime, ReplicaKey) {
    let bus = Arc::new(InMemoryBus::new());
    let runtime = AcmRuntime::builder()
        .bus(bus.clone())
        .config(runtime_config(BUDGET))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let silent = ReplicaKey::new(Uuid::new_v4(), Uuid::new_v4());
    let mut participant = Participant::new(
        silent,
        vec![SupportedElementType::new(HTTP_TYPE, TYPE_VERSION)],
    );
    participant.state = ParticipantState::Passive;
    participant.health = HealthStatus::Healthy;
    runtime
        .coordinator()
        .provider()
        .save_participant(&participant)
        .await
        .unwrap();

    (bus, runtime, silent)
}

#[tokio::test(start_paused = true)]
async fn test_deploy_with_silent_replica_is_incomplete() {
    let (bus, runtime, silent) = start_with_silent_replica().await;
    let k8s = start_participant(
        &bus,
        participant_config(K8S_TYPE, None),
        Arc::new(SimulatorListener::new("k8s")),
    )
    .await;
    wait_for_participants(runtime.coordinator(), 2).await;

    // Primed out of band so prime itself does not wait on the silent replica.
    let mut definition = CompositionDefinition::new(template("1.0.0"));
    definition.state = DefinitionState::Primed;
    definition
        .element_participants
        .insert(HTTP_ELEMENT.to_string(), silent.participant_id);
    definition
        .element_participants
        .insert(K8S_ELEMENT.to_string(), k8s.key().participant_id);
    let coordinator = runtime.coordinator();
    coordinator.provider().save_definition(&definition).await.unwrap();

    let created = coordinator
        .create_instance(instance(definition.composition_id))
        .await
        .unwrap();
    let outcome = coordinator.deploy(created.instance_id).await.unwrap();

    assert_eq!(
        outcome,
        CommandOutcome::Incomplete {
            pending: vec![silent]
        }
    );
    assert!(!outcome.is_success());

    let stored = coordinator
        .provider()
        .get_instance(created.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, AcState::Uninitialised);
    assert!(!stored.deployed);
    // The element whose owner did answer keeps the reported state.
    assert_eq!(
        stored.elements[&element_id(&created, K8S_ELEMENT)].state,
        AcState::Passive
    );

    let last = coordinator.last_command(created.instance_id).unwrap();
    assert!(matches!(last.outcome, CommandOutcome::Incomplete { .. }));

    k8s.shutdown().await.unwrap();
    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_prime_with_silent_replica_leaves_definition_unprimed() {
    let (bus, runtime, silent) = start_with_silent_replica().await;
    let k8s = start_participant(
        &bus,
        participant_config(K8S_TYPE, None),
        Arc::new(SimulatorListener::new("k8s")),
    )
    .await;
    wait_for_participants(runtime.coordinator(), 2).await;

    let coordinator = runtime.coordinator();
    let definition = coordinator.commission(template("1.0.0")).await.unwrap();
    let outcome = coordinator.prime(definition.composition_id).await.unwrap();
    match outcome {
        CommandOutcome::Incomplete { pending } => assert_eq!(pending, vec![silent]),
        other => panic!("expected incomplete, got {other:?}"),
    }

    let stored = coordinator
        .provider()
        .get_definition(definition.composition_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, DefinitionState::Unprimed);
    assert!(stored.element_participants.is_empty());

    // The replica that answered keeps its definitions.
    assert!(k8s.handler().is_primed(definition.composition_id).await);

    k8s.shutdown().await.unwrap();
    runtime.shutdown().await.unwrap();
}
