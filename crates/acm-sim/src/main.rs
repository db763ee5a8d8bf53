// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ACM Simulator
//!
//! Runs a coordinator and two simulated participants on an in-process bus
//! and drives one composition through its whole lifecycle.

mod scenario;

use std::sync::Arc;
use std::time::Duration;

use acm_participant::{Journal, ParticipantConfig, ParticipantRuntime, SimulatorListener};
use acm_protocol::bus::{InMemoryBus, MessageBus};
use acm_protocol::model::SupportedElementType;
use acm_runtime::{AcmRuntime, RuntimeConfig};
use tracing::{info, warn};
use uuid::Uuid;

async fn start_participant(
    bus: Arc<dyn MessageBus>,
    label: &str,
    element_type: &str,
    journal: Journal,
    pass_phrase: Option<&str>,
) -> anyhow::Result<ParticipantRuntime> {
    let mut config = ParticipantConfig::new(
        Uuid::new_v4(),
        vec![SupportedElementType::new(
            element_type,
            scenario::ELEMENT_TYPE_VERSION,
        )],
    );
    if let Some(pass_phrase) = pass_phrase {
        config = config.with_encryption_pass_phrase(pass_phrase);
    }
    let listener = SimulatorListener::new(label).with_journal(journal);

    ParticipantRuntime::builder()
        .bus(bus)
        .listener(Arc::new(listener))
        .config(config)
        .build()?
        .start()
        .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acm_sim=info,acm_runtime=info,acm_participant=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = RuntimeConfig::from_env()?;
    let pass_phrase = config
        .encryption_enabled
        .then(|| config.encryption_pass_phrase.clone())
        .flatten();
    info!(config = ?config, "Starting ACM simulator");

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let runtime = AcmRuntime::builder()
        .bus(bus.clone())
        .config(config)
        .build()?
        .start()
        .await?;

    let journal = Journal::default();
    let participants = vec![
        start_participant(
            bus.clone(),
            "http",
            scenario::HTTP_ELEMENT_TYPE,
            journal.clone(),
            pass_phrase.as_deref(),
        )
        .await?,
        start_participant(
            bus.clone(),
            "k8s",
            scenario::K8S_ELEMENT_TYPE,
            journal.clone(),
            pass_phrase.as_deref(),
        )
        .await?,
    ];

    scenario::wait_for_participants(runtime.coordinator(), participants.len(), Duration::from_secs(5))
        .await?;
    let result = scenario::run(runtime.coordinator()).await;

    let calls = journal
        .lock()
        .map(|calls| calls.clone())
        .unwrap_or_default();
    for call in &calls {
        info!(
            participant = %call.label,
            operation = %call.operation,
            element_id = ?call.element_id,
            stage = ?call.stage,
            "Listener call"
        );
    }
    info!(calls = calls.len(), "Simulation finished");

    for participant in participants {
        participant.shutdown().await?;
    }
    runtime.shutdown().await?;
    result
}
