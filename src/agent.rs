//! Agents and their tool bindings
//!
//! Agents written by older versions store their tools as a plain list of tool
//! ids (`tools: [..]`); newer ones store `toolBindings: [{toolId, authorizationId?}]`.
//! Both are normalised once, when the record is deserialized: if
//! `toolBindings` is present it wins, otherwise one binding without an
//! authorization is synthesized per legacy id. Nothing downstream looks at
//! the legacy field.

use crate::tools::Tool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Association of a tool with an optional explicitly selected authorization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolBinding {
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
}

impl ToolBinding {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            authorization_id: None,
        }
    }

    pub fn with_authorization(mut self, authorization_id: impl Into<String>) -> Self {
        self.authorization_id = Some(authorization_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", from = "AgentRecord")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tool_bindings: Vec<ToolBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored shape, accepting both tool reference formats
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRecord {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    tool_bindings: Option<Vec<ToolBinding>>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

impl From<AgentRecord> for Agent {
    fn from(record: AgentRecord) -> Self {
        let tool_bindings = normalize_bindings(record.tool_bindings, record.tools);
        Agent {
            id: record.id,
            name: record.name,
            description: record.description,
            system_prompt: record.system_prompt,
            tool_bindings,
            order: record.order,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// `toolBindings` if present, else one unauthorized binding per legacy id
pub fn normalize_bindings(
    bindings: Option<Vec<ToolBinding>>,
    legacy_tools: Option<Vec<String>>,
) -> Vec<ToolBinding> {
    match bindings {
        Some(bindings) => bindings,
        None => legacy_tools
            .unwrap_or_default()
            .into_iter()
            .map(ToolBinding::new)
            .collect(),
    }
}

impl Agent {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            tool_bindings: Vec::new(),
            order: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_binding(mut self, binding: ToolBinding) -> Self {
        self.tool_bindings.push(binding);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Binding for a tool id, if the agent has one
    pub fn binding_for(&self, tool_id: &str) -> Option<&ToolBinding> {
        self.tool_bindings.iter().find(|b| b.tool_id == tool_id)
    }

    /// Resolve bindings against the tool catalog, in binding order.
    ///
    /// Bindings that point at a tool id missing from the catalog are skipped.
    pub fn bound_tools<'a>(&'a self, catalog: &'a [Tool]) -> Vec<(&'a Tool, &'a ToolBinding)> {
        self.tool_bindings
            .iter()
            .filter_map(|binding| {
                let found = catalog.iter().find(|t| t.id == binding.tool_id);
                if found.is_none() {
                    log::warn!(
                        "Agent '{}' references missing tool id '{}'",
                        self.name,
                        binding.tool_id
                    );
                }
                found.map(|tool| (tool, binding))
            })
            .collect()
    }
}
