// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! A participant replica that comes back gets its definitions and instances
//! restored by the runtime.

mod common;

use std::sync::Arc;
use std::time::Duration;

use acm_participant::{ListenerOperation, SimulatorListener};
use acm_protocol::model::{AcState, HealthStatus, ParticipantState};
use acm_runtime::CommandOutcome;
use common::*;

#[tokio::test]
async fn test_restarted_replica_is_resynced() {
    let mut ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let (definition, instance) = ctx.deployed().await;
    let key = ctx.k8s_config.key();

    let old = ctx.participants.pop().expect("k8s participant");
    old.shutdown().await.unwrap();
    eventually("deregistration", || async {
        ctx.coordinator()
            .provider()
            .get_participant(key)
            .await
            .unwrap()
            .is_some_and(|p| p.state == ParticipantState::Terminated)
    })
    .await;

    let listener = Arc::new(SimulatorListener::new("k8s-restarted"));
    let restarted = start_participant(&ctx.bus, ctx.k8s_config.clone(), listener.clone()).await;
    assert_eq!(restarted.key(), key);

    eventually("instance to be restored", || async {
        restarted
            .handler()
            .instance(instance.instance_id)
            .await
            .is_some()
    })
    .await;
    assert!(restarted.handler().is_primed(definition.composition_id).await);

    let stored = ctx
        .coordinator()
        .provider()
        .get_participant(key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.health, HealthStatus::Healthy);
    assert!(stored.is_available());

    // Sync restores state without replaying deploys.
    assert!(listener.calls().is_empty());
    let held = restarted
        .handler()
        .instance(instance.instance_id)
        .await
        .unwrap();
    assert!(held.deployed);
    assert!(held.elements.values().all(|e| e.state == AcState::Passive));

    assert_eq!(
        ctx.coordinator().undeploy(instance.instance_id).await.unwrap(),
        CommandOutcome::Success
    );
    assert!(
        listener
            .calls()
            .iter()
            .any(|c| c.operation == ListenerOperation::Undeploy)
    );

    ctx.participants.push(restarted);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_deleted_instance_is_dropped_from_participants() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let definition = ctx.primed("1.0.0").await;
    let created = ctx
        .coordinator()
        .create_instance(instance(definition.composition_id))
        .await
        .unwrap();
    // A failed deploy leaves copies behind on both participants.
    ctx.http.fail(ListenerOperation::Deploy);
    ctx.k8s.fail(ListenerOperation::Deploy);
    let outcome = ctx.coordinator().deploy(created.instance_id).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Failed { .. }));
    for participant in &ctx.participants {
        assert!(participant.handler().instance(created.instance_id).await.is_some());
    }

    ctx.coordinator()
        .delete_instance(created.instance_id)
        .await
        .unwrap();
    for participant in &ctx.participants {
        eventually("instance to be dropped", || async {
            participant
                .handler()
                .instance(created.instance_id)
                .await
                .is_none()
        })
        .await;
    }

    ctx.shutdown().await;
}
