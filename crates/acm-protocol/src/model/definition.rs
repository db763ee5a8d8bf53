// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Composition definitions: service templates, node templates and the
//! per-participant element definitions pushed during priming.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::state::DefinitionState;

/// Highest stage number accepted from a node template.
pub const MAX_STAGE: u32 = 1000;

/// Name/version pair identifying an element definition or a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptId {
    pub name: String,
    pub version: String,
}

impl ConceptId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Schema of list or map entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySchema {
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Declared property of a node type or data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, rename = "entry_schema", skip_serializing_if = "Option::is_none")]
    pub entry_schema: Option<EntrySchema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl PropertyDefinition {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entry_schema: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Property carrying `sensitive: "true"` in its metadata.
    pub fn sensitive(mut self) -> Self {
        self.metadata.insert("sensitive".to_string(), "true".to_string());
        self
    }

    /// List or map property whose entries have the given type.
    pub fn with_entry_schema(mut self, type_name: impl Into<String>) -> Self {
        self.entry_schema = Some(EntrySchema {
            type_name: type_name.into(),
        });
        self
    }

    pub fn is_sensitive(&self) -> bool {
        self.metadata.get("sensitive").map(String::as_str) == Some("true")
    }

    /// Type names this property may refer to: its own type and, for
    /// collections, the entry type.
    pub fn referenced_types(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.type_name.as_str())
            .chain(self.entry_schema.iter().map(|e| e.type_name.as_str()))
    }
}

/// Named structured type used by properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    #[serde(default, rename = "derived_from", skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
}

/// Element type declaring the properties its templates carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeType {
    #[serde(default, rename = "derived_from", skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
}

/// Concrete element definition inside a service template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "type_version")]
    pub type_version: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl NodeTemplate {
    pub fn new(type_name: impl Into<String>, type_version: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            type_version: type_version.into(),
            version: "1.0.0".to_string(),
            description: None,
            properties: Map::new(),
        }
    }

    /// Element type this template instantiates.
    pub fn element_type(&self) -> ConceptId {
        ConceptId::new(&self.type_name, &self.type_version)
    }

    /// Stages in which elements of this template take part in a migration.
    ///
    /// The `stage` property is either a list of numbers or a map with a
    /// `migrate` list. Anything else, and any empty result, yields `{0}`.
    pub fn migrate_stages(&self) -> BTreeSet<u32> {
        match self.properties.get("stage") {
            Some(Value::Object(map)) => stage_set(map.get("migrate")),
            other => stage_set(other),
        }
    }

    /// Stages in which elements of this template take part in a prepare.
    ///
    /// Only the `prepare` key of a map-valued `stage` property counts.
    pub fn prepare_stages(&self) -> BTreeSet<u32> {
        match self.properties.get("stage") {
            Some(Value::Object(map)) => stage_set(map.get("prepare")),
            _ => BTreeSet::from([0]),
        }
    }
}

fn stage_set(value: Option<&Value>) -> BTreeSet<u32> {
    let stages: BTreeSet<u32> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_u64)
            .filter(|s| *s <= MAX_STAGE as u64)
            .map(|s| s as u32)
            .collect(),
        _ => BTreeSet::new(),
    };
    if stages.is_empty() {
        BTreeSet::from([0])
    } else {
        stages
    }
}

/// TOSCA-style service template holding the types and element templates of a
/// composition definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    pub name: String,
    pub version: String,
    #[serde(default, rename = "data_types")]
    pub data_types: BTreeMap<String, DataType>,
    #[serde(default, rename = "node_types")]
    pub node_types: BTreeMap<String, NodeType>,
    #[serde(default, rename = "node_templates")]
    pub node_templates: BTreeMap<String, NodeTemplate>,
}

impl ServiceTemplate {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Node template backing an element definition, matched by name.
    pub fn element_template(&self, definition: &ConceptId) -> Option<&NodeTemplate> {
        self.node_templates.get(&definition.name)
    }

    /// Element definitions of every node template, keyed by template name.
    pub fn element_definitions(&self) -> Vec<ElementDefinition> {
        self.node_templates
            .iter()
            .map(|(name, template)| ElementDefinition {
                id: ConceptId::new(name, &template.version),
                node_template: template.clone(),
            })
            .collect()
    }
}

/// Commissioned composition definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionDefinition {
    pub composition_id: Uuid,
    pub state: DefinitionState,
    pub service_template: ServiceTemplate,
    /// Participant each node template was primed on, by template name.
    #[serde(default)]
    pub element_participants: BTreeMap<String, Uuid>,
}

impl CompositionDefinition {
    pub fn new(service_template: ServiceTemplate) -> Self {
        Self {
            composition_id: Uuid::new_v4(),
            state: DefinitionState::Unprimed,
            service_template,
            element_participants: BTreeMap::new(),
        }
    }

    /// Element definitions assigned to one participant at prime time.
    pub fn definitions_for(&self, participant_id: Uuid) -> Vec<ElementDefinition> {
        self.service_template
            .element_definitions()
            .into_iter()
            .filter(|d| self.element_participants.get(&d.id.name) == Some(&participant_id))
            .collect()
    }

    /// Participants holding at least one element definition.
    pub fn participant_ids(&self) -> BTreeSet<Uuid> {
        self.element_participants.values().copied().collect()
    }
}

/// Element definition as pushed to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    pub id: ConceptId,
    pub node_template: NodeTemplate,
}

/// Element definitions owned by one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDefinition {
    pub participant_id: Uuid,
    pub element_definitions: Vec<ElementDefinition>,
}
