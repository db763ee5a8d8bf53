// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted lifecycle run against a coordinator.

use std::time::Duration;

use acm_protocol::model::{
    AcElement, AutomationComposition, ConceptId, NodeTemplate, NodeType, OrderedState,
    PropertyDefinition, ServiceTemplate,
};
use acm_runtime::{CommandOutcome, Coordinator};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub const HTTP_ELEMENT_TYPE: &str = "org.acm.HttpElement";
pub const K8S_ELEMENT_TYPE: &str = "org.acm.K8sElement";
pub const ELEMENT_TYPE_VERSION: &str = "1.0.0";

const HTTP_TEMPLATE: &str = "org.acm.sim.HttpChart";
const K8S_TEMPLATE: &str = "org.acm.sim.K8sChart";

/// Two-element composition. The HTTP element migrates in stage 0 and the
/// K8s element in stage 1.
pub fn service_template(version: &str) -> ServiceTemplate {
    let mut template = ServiceTemplate::new("sim-composition", version);
    template.node_types.insert(
        HTTP_ELEMENT_TYPE.to_string(),
        NodeType {
            derived_from: None,
            properties: [
                ("baseUrl".to_string(), PropertyDefinition::new("string")),
                ("password".to_string(), PropertyDefinition::new("string").sensitive()),
            ]
            .into(),
        },
    );

    let mut http = NodeTemplate::new(HTTP_ELEMENT_TYPE, ELEMENT_TYPE_VERSION);
    http.version = version.to_string();
    http.properties
        .insert("stage".to_string(), json!({ "migrate": [0], "prepare": [0] }));
    let mut k8s = NodeTemplate::new(K8S_ELEMENT_TYPE, ELEMENT_TYPE_VERSION);
    k8s.version = version.to_string();
    k8s.properties
        .insert("stage".to_string(), json!({ "migrate": [1], "prepare": [1] }));

    template.node_templates.insert(HTTP_TEMPLATE.to_string(), http);
    template.node_templates.insert(K8S_TEMPLATE.to_string(), k8s);
    template
}

/// Instance of `composition_id`. Participants are taken from the prime
/// assignment.
pub fn instance(composition_id: Uuid) -> AutomationComposition {
    AutomationComposition::new(composition_id, "sim-instance", "1.0.0")
        .with_element(
            AcElement::new(ConceptId::new(HTTP_TEMPLATE, "1.0.0"), Uuid::nil())
                .with_property("baseUrl", json!("http://sim.local"))
                .with_property("password", json!("mysecret")),
        )
        .with_element(
            AcElement::new(ConceptId::new(K8S_TEMPLATE, "1.0.0"), Uuid::nil())
                .with_property("chart", json!({ "name": "sim", "version": "0.1.0" })),
        )
}

fn expect(step: &str, outcome: CommandOutcome) -> anyhow::Result<()> {
    if outcome.is_success() {
        info!(step, outcome = %outcome, "Step finished");
        Ok(())
    } else {
        anyhow::bail!("{} finished with {}", step, outcome)
    }
}

/// Wait until `count` replicas have registered.
pub async fn wait_for_participants(
    coordinator: &Coordinator,
    count: usize,
    budget: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let registered = coordinator.provider().list_participants().await?.len();
        if registered >= count {
            info!(registered, "Participants registered");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("only {} of {} participants registered", registered, count);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Commission, prime, deploy, run, migrate, roll back and tear down.
pub async fn run(coordinator: &Coordinator) -> anyhow::Result<()> {
    let v1 = coordinator.commission(service_template("1.0.0")).await?;
    let v2 = coordinator.commission(service_template("2.0.0")).await?;
    expect("prime v1", coordinator.prime(v1.composition_id).await?)?;
    expect("prime v2", coordinator.prime(v2.composition_id).await?)?;

    let created = coordinator
        .create_instance(instance(v1.composition_id))
        .await?;
    let id = created.instance_id;

    expect("prepare", coordinator.prepare(id, true).await?)?;
    expect("deploy", coordinator.deploy(id).await?)?;
    expect(
        "run",
        coordinator.change_state(id, OrderedState::Running).await?,
    )?;
    expect("review", coordinator.prepare(id, false).await?)?;
    expect(
        "migrate precheck",
        coordinator.migrate(id, v2.composition_id, true).await?,
    )?;
    expect(
        "migrate",
        coordinator.migrate(id, v2.composition_id, false).await?,
    )?;
    expect("rollback", coordinator.rollback(id).await?)?;
    expect(
        "stop",
        coordinator.change_state(id, OrderedState::Passive).await?,
    )?;
    expect("undeploy", coordinator.undeploy(id).await?)?;

    let view = coordinator.instance_view(id).await?;
    info!(
        state = %view.state,
        composition_id = %view.composition_id,
        "Final instance state"
    );
    coordinator.delete_instance(id).await?;

    expect("deprime v1", coordinator.deprime(v1.composition_id).await?)?;
    expect("deprime v2", coordinator.deprime(v2.composition_id).await?)?;
    coordinator.decommission(v1.composition_id).await?;
    coordinator.decommission(v2.composition_id).await?;
    Ok(())
}
