// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Staged migration, rollback, prepare and review across two participants.

mod common;

use std::time::Duration;

use acm_participant::{ListenerCall, ListenerOperation};
use acm_protocol::model::AcState;
use acm_runtime::CommandOutcome;
use common::*;

fn position(calls: &[ListenerCall], label: &str, operation: ListenerOperation, stage: u32) -> usize {
    calls
        .iter()
        .position(|c| c.label == label && c.operation == operation && c.stage == Some(stage))
        .unwrap_or_else(|| panic!("no {operation} call on {label} in stage {stage}"))
}

fn journal(ctx: &TestContext) -> Vec<ListenerCall> {
    ctx.journal.lock().unwrap().clone()
}

#[tokio::test]
async fn test_migration_runs_stages_in_order() {
    // The slow stage-0 participant would lose any race with later stages.
    let ctx = TestContext::start_with(
        runtime_config(Duration::from_secs(5)),
        None,
        Duration::from_millis(100),
    )
    .await;
    let (v1, instance) = ctx.deployed().await;
    let v2 = ctx.primed("2.0.0").await;
    let coordinator = ctx.coordinator();

    let outcome = coordinator
        .migrate(instance.instance_id, v2.composition_id, false)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Success);

    let calls = journal(&ctx);
    let http_stage0 = position(&calls, "http", ListenerOperation::Migrate, 0);
    let k8s_stage1 = position(&calls, "k8s", ListenerOperation::Migrate, 1);
    let k8s_stage2 = position(&calls, "k8s", ListenerOperation::Migrate, 2);
    assert!(http_stage0 < k8s_stage1);
    assert!(k8s_stage1 < k8s_stage2);
    assert!(
        calls
            .iter()
            .filter(|c| c.operation == ListenerOperation::Migrate)
            .all(|c| c.composition_id == Some(v2.composition_id))
    );

    let stored = coordinator
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.composition_id, v2.composition_id);
    assert_eq!(stored.previous_composition_id, Some(v1.composition_id));
    assert!(stored.composition_target_id.is_none());
    assert_eq!(stored.state, AcState::Passive);
    assert!(stored.elements.values().all(|e| e.definition.version == "2.0.0"));

    let held = ctx.participants[1]
        .handler()
        .instance(instance.instance_id)
        .await
        .unwrap();
    assert_eq!(held.composition_id, v2.composition_id);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_precheck_changes_nothing() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let (v1, instance) = ctx.deployed().await;
    let v2 = ctx.primed("2.0.0").await;

    let outcome = ctx
        .coordinator()
        .migrate(instance.instance_id, v2.composition_id, true)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Success);

    let calls = journal(&ctx);
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.operation == ListenerOperation::MigratePrecheck)
            .count(),
        2
    );
    assert!(calls.iter().all(|c| c.operation != ListenerOperation::Migrate));

    let stored = ctx
        .coordinator()
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.composition_id, v1.composition_id);
    assert!(stored.composition_target_id.is_none());
    assert!(stored.previous_composition_id.is_none());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_rollback_after_completed_migration() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let (v1, instance) = ctx.deployed().await;
    let v2 = ctx.primed("2.0.0").await;
    let coordinator = ctx.coordinator();
    coordinator
        .migrate(instance.instance_id, v2.composition_id, false)
        .await
        .unwrap();

    assert_eq!(
        coordinator.rollback(instance.instance_id).await.unwrap(),
        CommandOutcome::Success
    );
    let calls = journal(&ctx);
    let http_stage0 = position(&calls, "http", ListenerOperation::Rollback, 0);
    let k8s_stage1 = position(&calls, "k8s", ListenerOperation::Rollback, 1);
    assert!(http_stage0 < k8s_stage1);

    let stored = coordinator
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.composition_id, v1.composition_id);
    assert!(stored.previous_composition_id.is_none());
    assert!(stored.elements.values().all(|e| e.definition.version == "1.0.0"));

    assert_eq!(
        coordinator.rollback(instance.instance_id).await.unwrap(),
        CommandOutcome::AlreadyInState
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_failed_stage_stops_migration() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let (v1, instance) = ctx.deployed().await;
    let v2 = ctx.primed("2.0.0").await;
    let coordinator = ctx.coordinator();
    ctx.k8s.fail(ListenerOperation::Migrate);

    let outcome = coordinator
        .migrate(instance.instance_id, v2.composition_id, false)
        .await
        .unwrap();
    assert!(matches!(outcome, CommandOutcome::Failed { .. }));

    let calls = journal(&ctx);
    assert!(
        calls
            .iter()
            .all(|c| !(c.operation == ListenerOperation::Migrate && c.stage == Some(2)))
    );

    let stored = coordinator
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.composition_id, v1.composition_id);
    assert_eq!(stored.composition_target_id, Some(v2.composition_id));

    // A new migration waits for the rollback.
    assert!(
        coordinator
            .migrate(instance.instance_id, v2.composition_id, false)
            .await
            .is_err()
    );
    assert_eq!(
        coordinator.rollback(instance.instance_id).await.unwrap(),
        CommandOutcome::Success
    );
    let stored = coordinator
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.composition_id, v1.composition_id);
    assert!(stored.composition_target_id.is_none());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_prepare_and_review() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let definition = ctx.primed("1.0.0").await;
    let created = ctx
        .coordinator()
        .create_instance(instance(definition.composition_id))
        .await
        .unwrap();
    let coordinator = ctx.coordinator();

    assert_eq!(
        coordinator.prepare(created.instance_id, true).await.unwrap(),
        CommandOutcome::Success
    );
    // Review is only valid once deployed.
    assert!(coordinator.prepare(created.instance_id, false).await.is_err());

    assert_eq!(
        coordinator.deploy(created.instance_id).await.unwrap(),
        CommandOutcome::Success
    );
    assert_eq!(
        coordinator.prepare(created.instance_id, false).await.unwrap(),
        CommandOutcome::Success
    );

    for listener in [&ctx.http, &ctx.k8s] {
        let operations: Vec<_> = listener
            .calls()
            .into_iter()
            .map(|c| c.operation)
            .filter(|op| matches!(op, ListenerOperation::Prepare | ListenerOperation::Review))
            .collect();
        assert_eq!(
            operations,
            vec![ListenerOperation::Prepare, ListenerOperation::Review],
            "{}",
            listener.label()
        );
    }
    let view = coordinator.instance_view(created.instance_id).await.unwrap();
    assert_eq!(view.state, AcState::Passive);

    ctx.shutdown().await;
}
