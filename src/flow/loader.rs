// SPDX-License-Identifier: MIT

//! Flow loader - YAML/JSON file loading and saving
//!
//! A flow document is the serialized graph: `{ nodes, edges, strings }`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::types::{Edge, Node};
use crate::error::FlowError;

/// Serialized form of a flow graph
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct FlowDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Interned field strings; integer field values index into this
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strings: Vec<String>,
}

/// Loads and saves flow documents
pub struct FlowLoader;

impl FlowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a flow from a YAML or JSON file
    pub fn load_flow<P: AsRef<Path>>(&self, path: P) -> Result<FlowDocument, FlowError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a flow document; JSON input is valid YAML, so one parser covers both
    pub fn parse(content: &str) -> Result<FlowDocument, FlowError> {
        let doc: FlowDocument = serde_yaml::from_str(content)?;
        Ok(doc)
    }

    /// Write a flow back to disk, as JSON for `.json` paths and YAML otherwise
    pub fn save_flow<P: AsRef<Path>>(&self, path: P, doc: &FlowDocument) -> Result<(), FlowError> {
        let path = path.as_ref();
        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(doc)?
        } else {
            serde_yaml::to_string(doc)?
        };
        fs::write(path, content)?;
        Ok(())
    }
}

impl Default for FlowLoader {
    fn default() -> Self {
        Self::new()
    }
}
