// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Element info reported by participants outside of commands is stored by
//! the runtime.

mod common;

use std::time::Duration;

use acm_protocol::model::{ElementInfo, OrderedState};
use acm_runtime::CommandOutcome;
use common::*;
use serde_json::json;

fn reported_info() -> ElementInfo {
    let mut info = ElementInfo {
        use_state: Some("IDLE".to_string()),
        operational_state: Some("ENABLED".to_string()),
        ..ElementInfo::default()
    };
    info.out_properties
        .insert("endpoint".to_string(), json!("http://svc:8080"));
    info
}

#[tokio::test]
async fn test_reported_element_info_is_persisted() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let (_, instance) = ctx.deployed().await;
    let http_element = element_id(&instance, HTTP_ELEMENT);
    let k8s_element = element_id(&instance, K8S_ELEMENT);

    ctx.participants[0]
        .handler()
        .send_element_info(instance.instance_id, http_element, reported_info())
        .await
        .unwrap();

    let coordinator = ctx.coordinator();
    eventually("element info to be stored", || async {
        coordinator
            .instance_view(instance.instance_id)
            .await
            .is_ok_and(|view| {
                view.elements
                    .iter()
                    .any(|e| e.element_id == http_element && e.info == reported_info())
            })
    })
    .await;

    let stored = coordinator
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.elements[&http_element].info, reported_info());
    assert!(stored.elements[&k8s_element].info.is_empty());

    // A heartbeat without new info and a later command keep it.
    ctx.participants[0].handler().send_status(false).await.unwrap();
    assert_eq!(
        coordinator
            .change_state(instance.instance_id, OrderedState::Running)
            .await
            .unwrap(),
        CommandOutcome::Success
    );
    let stored = coordinator
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.elements[&http_element].info, reported_info());
    let held = ctx.participants[0]
        .handler()
        .instance(instance.instance_id)
        .await
        .unwrap();
    assert_eq!(held.elements[&http_element].info, reported_info());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_element_info_for_foreign_element_is_rejected() {
    let ctx = TestContext::start(runtime_config(Duration::from_secs(5))).await;
    let (_, instance) = ctx.deployed().await;

    // The HTTP replica does not hold the K8s element.
    let result = ctx.participants[0]
        .handler()
        .send_element_info(
            instance.instance_id,
            element_id(&instance, K8S_ELEMENT),
            reported_info(),
        )
        .await;
    assert!(result.is_err());
    let stored = ctx
        .coordinator()
        .provider()
        .get_instance(instance.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.elements.values().all(|e| e.info.is_empty()));

    ctx.shutdown().await;
}
