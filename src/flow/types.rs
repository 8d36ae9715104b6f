// SPDX-License-Identifier: MIT

//! Graph type definitions
//!
//! Nodes carry a free-form JSON data record; edges connect an output
//! handle of one node to an input handle of another.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub type NodeId = String;

/// Variable name -> values bound to it, produced per pull
pub type PulledBindings = HashMap<String, Vec<PulledValue>>;

/// A node in the flow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Node {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Node type tag (e.g. "prompt", "table", "inspect")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Free-form data record
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data,
        }
    }

    /// Input variable names this node declares in `data.vars`
    pub fn declared_vars(&self) -> Vec<String> {
        self.data
            .get("vars")
            .and_then(Value::as_array)
            .map(|vars| {
                vars.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a downstream refresh was requested for this node
    pub fn needs_refresh(&self) -> bool {
        self.data
            .get("refresh")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A directed connection from `source.source_handle` to `target.target_handle`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        let mut edge = Self {
            id: String::new(),
            source: source.into(),
            source_handle: source_handle.into(),
            target: target.into(),
            target_handle: target_handle.into(),
        };
        edge.id = edge.default_id();
        edge
    }

    /// Id derived from the connection tuple
    pub fn default_id(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.source, self.source_handle, self.target, self.target_handle
        )
    }

    /// True when both edges describe the same connection, ignoring ids
    pub fn same_connection(&self, other: &Edge) -> bool {
        self.source == other.source
            && self.source_handle == other.source_handle
            && self.target == other.target
            && self.target_handle == other.target_handle
    }
}

/// A resolved value plus side information carried into templates
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct TemplateVarInfo {
    pub text: String,
    #[serde(default)]
    pub metavars: BTreeMap<String, String>,
    /// Groups values that came from the same source row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associate_id: Option<String>,
}

/// One value bound to a variable: either a bare string or a rich value
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PulledValue {
    Plain(String),
    Info(TemplateVarInfo),
}

impl PulledValue {
    pub fn text(&self) -> &str {
        match self {
            PulledValue::Plain(s) => s,
            PulledValue::Info(info) => &info.text,
        }
    }

    pub fn metavars(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            PulledValue::Plain(_) => None,
            PulledValue::Info(info) => Some(&info.metavars),
        }
    }

    pub fn associate_id(&self) -> Option<&str> {
        match self {
            PulledValue::Plain(_) => None,
            PulledValue::Info(info) => info.associate_id.as_deref(),
        }
    }
}

impl From<&str> for PulledValue {
    fn from(s: &str) -> Self {
        PulledValue::Plain(s.to_string())
    }
}

impl From<TemplateVarInfo> for PulledValue {
    fn from(info: TemplateVarInfo) -> Self {
        PulledValue::Info(info)
    }
}
