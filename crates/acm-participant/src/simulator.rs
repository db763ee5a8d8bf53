// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scriptable [`ElementListener`] that records every call.
//!
//! Used by the simulator binary and by tests. Several listeners can share
//! one [`Journal`] so the order of calls across participants is observable.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use acm_protocol::model::{AcElement, ElementDefinition, OrderedState};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ParticipantError, Result};
use crate::listener::ElementListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerOperation {
    Prime,
    Deprime,
    Deploy,
    Undeploy,
    StateChange,
    Update,
    Migrate,
    Rollback,
    MigratePrecheck,
    Prepare,
    Review,
}

impl ListenerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prime => "prime",
            Self::Deprime => "deprime",
            Self::Deploy => "deploy",
            Self::Undeploy => "undeploy",
            Self::StateChange => "state_change",
            Self::Update => "update",
            Self::Migrate => "migrate",
            Self::Rollback => "rollback",
            Self::MigratePrecheck => "migrate_precheck",
            Self::Prepare => "prepare",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for ListenerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded listener invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerCall {
    /// Label of the listener that received the call
    pub label: String,
    pub operation: ListenerOperation,
    pub composition_id: Option<Uuid>,
    pub instance_id: Option<Uuid>,
    pub element_id: Option<Uuid>,
    pub stage: Option<u32>,
    /// Element properties as the listener saw them
    pub properties: Map<String, Value>,
}

/// Call log shared between listeners.
pub type Journal = Arc<Mutex<Vec<ListenerCall>>>;

pub struct SimulatorListener {
    label: String,
    journal: Journal,
    failing: Mutex<HashSet<ListenerOperation>>,
    delay: Duration,
}

impl fmt::Debug for SimulatorListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorListener")
            .field("label", &self.label)
            .field("delay", &self.delay)
            .finish()
    }
}

impl SimulatorListener {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            journal: Journal::default(),
            failing: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
        }
    }

    /// Record into a journal shared with other listeners.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Wait this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Make every later call of `operation` fail.
    pub fn fail(&self, operation: ListenerOperation) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation);
    }

    pub fn recover(&self, operation: ListenerOperation) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&operation);
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Calls received by this listener, in order.
    pub fn calls(&self) -> Vec<ListenerCall> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.label == self.label)
            .cloned()
            .collect()
    }

    fn call(&self, operation: ListenerOperation) -> ListenerCall {
        ListenerCall {
            label: self.label.clone(),
            operation,
            composition_id: None,
            instance_id: None,
            element_id: None,
            stage: None,
            properties: Map::new(),
        }
    }

    fn element_call(
        &self,
        operation: ListenerOperation,
        instance_id: Uuid,
        element: &AcElement,
        stage: Option<u32>,
    ) -> ListenerCall {
        ListenerCall {
            instance_id: Some(instance_id),
            element_id: Some(element.id),
            stage,
            properties: element.properties.clone(),
            ..self.call(operation)
        }
    }

    async fn record(&self, call: ListenerCall) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let operation = call.operation;
        debug!(
            label = %self.label,
            operation = %operation,
            element_id = ?call.element_id,
            stage = ?call.stage,
            "Simulated call"
        );
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&operation);
        if failing {
            info!(label = %self.label, operation = %operation, "Simulated failure");
            return Err(ParticipantError::listener(
                operation.as_str(),
                format!("simulated failure on {}", self.label),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ElementListener for SimulatorListener {
    async fn prime(&self, composition_id: Uuid, _definitions: &[ElementDefinition]) -> Result<()> {
        self.record(ListenerCall {
            composition_id: Some(composition_id),
            ..self.call(ListenerOperation::Prime)
        })
        .await
    }

    async fn deprime(&self, composition_id: Uuid) -> Result<()> {
        self.record(ListenerCall {
            composition_id: Some(composition_id),
            ..self.call(ListenerOperation::Deprime)
        })
        .await
    }

    async fn deploy(&self, instance_id: Uuid, element: &AcElement) -> Result<()> {
        self.record(self.element_call(ListenerOperation::Deploy, instance_id, element, None))
            .await
    }

    async fn undeploy(&self, instance_id: Uuid, element: &AcElement) -> Result<()> {
        self.record(self.element_call(ListenerOperation::Undeploy, instance_id, element, None))
            .await
    }

    async fn state_change(
        &self,
        instance_id: Uuid,
        element: &AcElement,
        _ordered_state: OrderedState,
    ) -> Result<()> {
        self.record(self.element_call(ListenerOperation::StateChange, instance_id, element, None))
            .await
    }

    async fn update(&self, instance_id: Uuid, element: &AcElement) -> Result<()> {
        self.record(self.element_call(ListenerOperation::Update, instance_id, element, None))
            .await
    }

    async fn migrate(
        &self,
        instance_id: Uuid,
        element: &AcElement,
        composition_target_id: Uuid,
        stage: u32,
        rollback: bool,
    ) -> Result<()> {
        let operation = if rollback {
            ListenerOperation::Rollback
        } else {
            ListenerOperation::Migrate
        };
        self.record(ListenerCall {
            composition_id: Some(composition_target_id),
            ..self.element_call(operation, instance_id, element, Some(stage))
        })
        .await
    }

    async fn migrate_precheck(
        &self,
        instance_id: Uuid,
        element: &AcElement,
        composition_target_id: Uuid,
    ) -> Result<()> {
        self.record(ListenerCall {
            composition_id: Some(composition_target_id),
            ..self.element_call(ListenerOperation::MigratePrecheck, instance_id, element, None)
        })
        .await
    }

    async fn prepare(
        &self,
        instance_id: Uuid,
        element: &AcElement,
        pre_deploy: bool,
        stage: u32,
    ) -> Result<()> {
        let operation = if pre_deploy {
            ListenerOperation::Prepare
        } else {
            ListenerOperation::Review
        };
        self.record(self.element_call(operation, instance_id, element, Some(stage)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acm_protocol::model::ConceptId;
    use serde_json::json;

    fn element() -> AcElement {
        AcElement::new(ConceptId::new("org.acm.Element", "1.0.0"), Uuid::new_v4())
            .with_property("url", json!("http://localhost"))
    }

    #[tokio::test]
    async fn test_records_calls_and_fails_on_demand() {
        let listener = SimulatorListener::new("sim-a");
        let instance_id = Uuid::new_v4();
        let element = element();

        listener.deploy(instance_id, &element).await.unwrap();
        listener.fail(ListenerOperation::Undeploy);
        let err = listener.undeploy(instance_id, &element).await.unwrap_err();
        assert!(err.to_string().contains("undeploy failed"));

        listener.recover(ListenerOperation::Undeploy);
        listener.undeploy(instance_id, &element).await.unwrap();

        let calls = listener.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].operation, ListenerOperation::Deploy);
        assert_eq!(calls[0].element_id, Some(element.id));
        assert_eq!(calls[0].properties["url"], "http://localhost");
    }

    #[tokio::test]
    async fn test_shared_journal_keeps_global_order() {
        let journal = Journal::default();
        let a = SimulatorListener::new("a").with_journal(journal.clone());
        let b = SimulatorListener::new("b").with_journal(journal.clone());
        let instance_id = Uuid::new_v4();
        let target = Uuid::new_v4();

        b.migrate(instance_id, &element(), target, 0, false).await.unwrap();
        a.migrate(instance_id, &element(), target, 1, true).await.unwrap();

        let calls = journal.lock().unwrap().clone();
        let order: Vec<_> = calls.iter().map(|c| (c.label.as_str(), c.stage)).collect();
        assert_eq!(order, vec![("b", Some(0)), ("a", Some(1))]);
        assert_eq!(calls[1].operation, ListenerOperation::Rollback);
        assert_eq!(a.calls().len(), 1);
    }
}
