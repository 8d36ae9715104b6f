// SPDX-License-Identifier: MIT

//! Flow runner
//!
//! Owns the graph store and drives pulls, prompt generation and
//! evaluator runs against it. This is the only place that mutates the
//! store in response to a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::config::EngineConfig;
use crate::error::FlowError;
use crate::eval::{EvalOrchestrator, EvalRun, EvaluatorDescriptor, EvaluatorRegistry, LLMResponse};
use crate::flow::{pull_input_data, EdgeRemoval, FlowDocument, GraphStore, NodeId, PulledBindings};
use crate::template::{generate_prompts, FilledPrompt, PromptTemplate};

/// Input handle that carries prior responses into an evaluator node
pub const RESPONSE_BATCH_HANDLE: &str = "responseBatch";

/// Source of previously generated responses, per producing node
#[async_trait]
pub trait ResponseFetcher: Send + Sync {
    async fn fetch_prior_responses(
        &self,
        node_ids: &[NodeId],
    ) -> Result<Vec<LLMResponse>, FlowError>;
}

/// In-memory responses keyed by the node that produced them
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct MemoryResponses {
    by_node: HashMap<NodeId, Vec<LLMResponse>>,
}

impl MemoryResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `node_id -> [response]` map from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FlowError> {
        let content = fs::read_to_string(path)?;
        let responses: MemoryResponses = serde_yaml::from_str(&content)?;
        Ok(responses)
    }

    pub fn insert(&mut self, node_id: impl Into<NodeId>, responses: Vec<LLMResponse>) {
        self.by_node.insert(node_id.into(), responses);
    }
}

#[async_trait]
impl ResponseFetcher for MemoryResponses {
    async fn fetch_prior_responses(
        &self,
        node_ids: &[NodeId],
    ) -> Result<Vec<LLMResponse>, FlowError> {
        let mut out = Vec::new();
        for id in node_ids {
            match self.by_node.get(id) {
                Some(responses) => out.extend(responses.iter().cloned()),
                None => log::warn!("No stored responses for node {}", id),
            }
        }
        Ok(out)
    }
}

pub struct FlowRunner {
    store: GraphStore,
    config: EngineConfig,
    orchestrator: EvalOrchestrator,
}

impl FlowRunner {
    pub fn new(store: GraphStore, config: EngineConfig, registry: EvaluatorRegistry) -> Self {
        let orchestrator = EvalOrchestrator::from_config(registry, &config);
        Self {
            store,
            config,
            orchestrator,
        }
    }

    /// Build a runner over a loaded flow document
    pub fn from_document(
        doc: FlowDocument,
        config: EngineConfig,
        registry: EvaluatorRegistry,
    ) -> Self {
        let store = GraphStore::from_document(doc, config.refreshable_types.iter().cloned());
        Self::new(store, config, registry)
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &EvalOrchestrator {
        &self.orchestrator
    }

    pub fn to_document(&self) -> FlowDocument {
        self.store.to_document()
    }

    /// Pull the variables declared in the node's `data.vars`
    pub fn pull(&mut self, node_id: &str) -> Result<PulledBindings, FlowError> {
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))?;
        let vars = node.declared_vars();

        let bindings = pull_input_data(&mut self.store, &vars, node_id)?;
        self.store.clear_refresh(node_id);
        Ok(bindings)
    }

    /// Fill the node's `data.prompt` with every combination of its pulled inputs
    pub fn prompts(&mut self, node_id: &str) -> Result<Vec<FilledPrompt>, FlowError> {
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))?;
        let source = node
            .data
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::invalid_data(node_id, "missing string field `prompt`"))?;
        let template = PromptTemplate::parse(source);

        let bindings = pull_input_data(&mut self.store, &template.var_names(), node_id)?;
        let prompts = generate_prompts(&template, &bindings);
        log::info!("Node {} produced {} prompts", node_id, prompts.len());
        Ok(prompts)
    }

    /// Run the node's evaluators over the responses feeding its
    /// `responseBatch` input, then store the merged output on the node
    pub async fn run_evaluators(
        &mut self,
        node_id: &str,
        fetcher: &dyn ResponseFetcher,
    ) -> Result<EvalRun, FlowError> {
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))?;
        let descriptors: Vec<EvaluatorDescriptor> = match node.data.get("evaluators") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| FlowError::invalid_data(node_id, format!("bad `evaluators`: {}", e)))?,
            None => Vec::new(),
        };

        let sources = self.response_sources(node_id);
        let inputs = fetcher.fetch_prior_responses(&sources).await?;
        log::info!(
            "Node {}: {} evaluators over {} records from {:?}",
            node_id,
            descriptors.len(),
            inputs.len(),
            sources
        );

        let run = self.orchestrator.run_all_detailed(&descriptors, &inputs).await;

        let settled: Vec<EvaluatorDescriptor> = descriptors
            .into_iter()
            .map(|mut desc| {
                desc.progress = None;
                desc
            })
            .collect();
        let mut patch = Map::new();
        patch.insert("output".to_string(), serde_json::to_value(&run.responses)?);
        patch.insert("evaluators".to_string(), serde_json::to_value(&settled)?);
        self.store.update_node_data(node_id, patch);
        self.store.ping_outputs(node_id);

        Ok(run)
    }

    /// Distinct live sources of the node's response input; edges from
    /// removed nodes are pruned
    fn response_sources(&mut self, node_id: &str) -> Vec<NodeId> {
        let mut sources: Vec<NodeId> = Vec::new();
        let mut stale: Vec<String> = Vec::new();
        for edge in self.store.edges_into(node_id, RESPONSE_BATCH_HANDLE) {
            if !self.store.contains_node(&edge.source) {
                stale.push(edge.id.clone());
            } else if !sources.contains(&edge.source) {
                sources.push(edge.source.clone());
            }
        }
        for id in stale {
            self.store.prune_edge(&id, EdgeRemoval::MissingSource);
        }
        sources
    }
}
