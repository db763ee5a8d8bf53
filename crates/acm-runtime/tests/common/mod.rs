// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for acm-runtime integration tests.
//!
//! Provides TestContext, which wires a runtime and two simulated
//! participants to one in-memory bus.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use acm_participant::{Journal, ParticipantConfig, ParticipantRuntime, SimulatorListener};
use acm_protocol::InMemoryBus;
use acm_protocol::model::{
    AcElement, AutomationComposition, CompositionDefinition, ConceptId, NodeTemplate, NodeType,
    PropertyDefinition, ServiceTemplate, SupportedElementType,
};
use acm_runtime::{AcmRuntime, CommandOutcome, Coordinator, RuntimeConfig};
use serde_json::json;
use uuid::Uuid;

pub const HTTP_TYPE: &str = "org.acm.HttpElement";
pub const K8S_TYPE: &str = "org.acm.K8sElement";
pub const TYPE_VERSION: &str = "1.0.0";

/// Element definition names inside the test service template.
pub const HTTP_ELEMENT: &str = "org.acm.test.HttpChart";
pub const K8S_ELEMENT: &str = "org.acm.test.K8sChart";

pub const PASS_PHRASE: &str = "integration-pass";

pub fn runtime_config(command_timeout: Duration) -> RuntimeConfig {
    RuntimeConfig {
        command_timeout,
        ..RuntimeConfig::default()
    }
}

pub fn encrypted_runtime_config(command_timeout: Duration) -> RuntimeConfig {
    RuntimeConfig {
        encryption_enabled: true,
        encryption_pass_phrase: Some(PASS_PHRASE.to_string()),
        ..runtime_config(command_timeout)
    }
}

/// Two-element template. The HTTP element migrates in stage 0, the K8s
/// element in stages 1 and 2. `password` on the HTTP type is sensitive.
pub fn template(version: &str) -> ServiceTemplate {
    let mut template = ServiceTemplate::new("it-composition", version);
    template.node_types.insert(
        HTTP_TYPE.to_string(),
        NodeType {
            derived_from: None,
            properties: [
                ("url".to_string(), PropertyDefinition::new("string")),
                ("password".to_string(), PropertyDefinition::new("string").sensitive()),
            ]
            .into(),
        },
    );

    let mut http = NodeTemplate::new(HTTP_TYPE, TYPE_VERSION);
    http.version = version.to_string();
    http.properties
        .insert("stage".to_string(), json!({ "migrate": [0], "prepare": [0] }));
    let mut k8s = NodeTemplate::new(K8S_TYPE, TYPE_VERSION);
    k8s.version = version.to_string();
    k8s.properties.insert("stage".to_string(), json!([1, 2]));

    template.node_templates.insert(HTTP_ELEMENT.to_string(), http);
    template.node_templates.insert(K8S_ELEMENT.to_string(), k8s);
    template
}

/// Instance of a primed definition; participants come from the prime
/// assignment.
pub fn instance(composition_id: Uuid) -> AutomationComposition {
    AutomationComposition::new(composition_id, "it-instance", "1.0.0")
        .with_element(
            AcElement::new(ConceptId::new(HTTP_ELEMENT, "1.0.0"), Uuid::nil())
                .with_property("url", json!("http://it.local"))
                .with_property("password", json!("mysecret")),
        )
        .with_element(
            AcElement::new(ConceptId::new(K8S_ELEMENT, "1.0.0"), Uuid::nil())
                .with_property("namespace", json!("it")),
        )
}

pub fn element_id(instance: &AutomationComposition, name: &str) -> Uuid {
    instance
        .elements
        .values()
        .find(|e| e.definition.name == name)
        .map(|e| e.id)
        .unwrap_or_else(|| panic!("no element {name}"))
}

pub fn participant_config(element_type: &str, pass_phrase: Option<&str>) -> ParticipantConfig {
    let config = ParticipantConfig::new(
        Uuid::new_v4(),
        vec![SupportedElementType::new(element_type, TYPE_VERSION)],
    )
    .with_heartbeat_interval(Duration::ZERO);
    match pass_phrase {
        Some(pass_phrase) => config.with_encryption_pass_phrase(pass_phrase),
        None => config,
    }
}

pub async fn start_participant(
    bus: &Arc<InMemoryBus>,
    config: ParticipantConfig,
    listener: Arc<SimulatorListener>,
) -> ParticipantRuntime {
    ParticipantRuntime::builder()
        .bus(bus.clone())
        .listener(listener)
        .config(config)
        .build()
        .expect("participant config")
        .start()
        .await
        .expect("participant start")
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_participants(coordinator: &Coordinator, count: usize) {
    eventually("participants to register", || async {
        coordinator
            .provider()
            .list_participants()
            .await
            .map(|p| p.iter().filter(|p| p.is_available()).count() >= count)
            .unwrap_or(false)
    })
    .await;
}

/// Runtime plus an HTTP and a K8s participant sharing one journal.
pub struct TestContext {
    pub bus: Arc<InMemoryBus>,
    pub runtime: AcmRuntime,
    pub journal: Journal,
    pub http: Arc<SimulatorListener>,
    pub k8s: Arc<SimulatorListener>,
    pub http_config: ParticipantConfig,
    pub k8s_config: ParticipantConfig,
    pub participants: Vec<ParticipantRuntime>,
}

impl TestContext {
    pub async fn start(config: RuntimeConfig) -> Self {
        Self::start_with(config, None, Duration::ZERO).await
    }

    /// Start with an optional participant pass phrase and a listener delay
    /// applied to the HTTP participant.
    pub async fn start_with(
        config: RuntimeConfig,
        pass_phrase: Option<&str>,
        http_delay: Duration,
    ) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let runtime = AcmRuntime::builder()
            .bus(bus.clone())
            .config(config)
            .build()
            .expect("runtime config")
            .start()
            .await
            .expect("runtime start");

        let journal = Journal::default();
        let http = Arc::new(
            SimulatorListener::new("http")
                .with_journal(journal.clone())
                .with_delay(http_delay),
        );
        let k8s = Arc::new(SimulatorListener::new("k8s").with_journal(journal.clone()));
        let http_config = participant_config(HTTP_TYPE, pass_phrase);
        let k8s_config = participant_config(K8S_TYPE, pass_phrase);

        let participants = vec![
            start_participant(&bus, http_config.clone(), http.clone()).await,
            start_participant(&bus, k8s_config.clone(), k8s.clone()).await,
        ];
        wait_for_participants(runtime.coordinator(), 2).await;

        Self {
            bus,
            runtime,
            journal,
            http,
            k8s,
            http_config,
            k8s_config,
            participants,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        self.runtime.coordinator()
    }

    /// Commission and prime a definition of the test template.
    pub async fn primed(&self, version: &str) -> CompositionDefinition {
        let definition = self
            .coordinator()
            .commission(template(version))
            .await
            .expect("commission");
        let outcome = self
            .coordinator()
            .prime(definition.composition_id)
            .await
            .expect("prime");
        assert_eq!(outcome, CommandOutcome::Success);
        definition
    }

    /// Create and deploy an instance of a freshly primed definition.
    pub async fn deployed(&self) -> (CompositionDefinition, AutomationComposition) {
        let definition = self.primed("1.0.0").await;
        let created = self
            .coordinator()
            .create_instance(instance(definition.composition_id))
            .await
            .expect("create instance");
        let outcome = self
            .coordinator()
            .deploy(created.instance_id)
            .await
            .expect("deploy");
        assert_eq!(outcome, CommandOutcome::Success);
        (definition, created)
    }

    pub fn journal_len(&self) -> usize {
        self.journal.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub async fn shutdown(self) {
        for participant in self.participants {
            participant.shutdown().await.expect("participant shutdown");
        }
        self.runtime.shutdown().await.expect("runtime shutdown");
    }
}
