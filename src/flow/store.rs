// SPDX-License-Identifier: MIT

//! Owned graph store
//!
//! The store is the single writer for nodes and edges. Every mutation
//! goes through a command method and is recorded on a notification list
//! that the owner drains with [`GraphStore::take_events`].

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::loader::FlowDocument;
use super::lookup::StringLookup;
use super::types::{Edge, Node, NodeId};

/// Why an edge left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRemoval {
    /// Explicit removal by the owner
    Removed,
    /// The edge's source node no longer exists
    MissingSource,
    /// The source node exists but cannot produce the requested handle
    UnresolvedHandle,
}

/// Notification recorded by store mutations
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    NodeDataChanged(NodeId),
    EdgeRemoved { edge: Edge, reason: EdgeRemoval },
    RefreshRequested(NodeId),
}

/// Authoritative set of nodes and edges
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    nodes: HashMap<NodeId, Node>,
    node_order: Vec<NodeId>,
    edges: Vec<Edge>,
    lookup: StringLookup,
    refreshable: HashSet<String>,
    events: Vec<StoreEvent>,
}

impl GraphStore {
    /// Create an empty store; nodes of `refreshable_types` get pinged
    pub fn new<I, S>(refreshable_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refreshable: refreshable_types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Build a store from a loaded flow document
    pub fn from_document<I, S>(doc: FlowDocument, refreshable_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::new(refreshable_types);
        store.lookup = StringLookup::from_strings(doc.strings);
        for node in doc.nodes {
            store.add_node(node);
        }
        for edge in doc.edges {
            store.add_edge(edge);
        }
        store.events.clear();
        store
    }

    /// Snapshot the graph as a flow document
    pub fn to_document(&self) -> FlowDocument {
        FlowDocument {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges.clone(),
            strings: self.lookup.strings().to_vec(),
        }
    }

    /// Insert or replace a node
    pub fn add_node(&mut self, node: Node) {
        if !self.nodes.contains_key(&node.id) {
            self.node_order.push(node.id.clone());
        }
        self.events.push(StoreEvent::NodeDataChanged(node.id.clone()));
        self.nodes.insert(node.id.clone(), node);
    }

    /// Remove a node. Its edges stay until a pull finds them stale.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.node_order.retain(|n| n != id);
        log::debug!("Removed node {}", id);
        Some(node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Replace a node's data record
    pub fn set_node_data(&mut self, id: &str, data: Map<String, Value>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.data = data;
                self.events.push(StoreEvent::NodeDataChanged(id.to_string()));
                true
            }
            None => false,
        }
    }

    /// Merge keys into a node's data record, overwriting existing keys
    pub fn update_node_data(&mut self, id: &str, patch: Map<String, Value>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                for (k, v) in patch {
                    node.data.insert(k, v);
                }
                self.events.push(StoreEvent::NodeDataChanged(id.to_string()));
                true
            }
            None => false,
        }
    }

    /// Add an edge; returns false if the same connection already exists
    pub fn add_edge(&mut self, mut edge: Edge) -> bool {
        if self.edges.iter().any(|e| e.same_connection(&edge)) {
            log::debug!("Ignoring duplicate edge {}", edge.default_id());
            return false;
        }
        if edge.id.is_empty() {
            edge.id = edge.default_id();
        }
        self.edges.push(edge);
        true
    }

    /// Remove an edge by id
    pub fn remove_edge(&mut self, id: &str) -> Option<Edge> {
        self.prune_edge(id, EdgeRemoval::Removed)
    }

    /// Remove an edge by id, recording why
    pub fn prune_edge(&mut self, id: &str, reason: EdgeRemoval) -> Option<Edge> {
        let pos = self.edges.iter().position(|e| e.id == id)?;
        let edge = self.edges.remove(pos);
        if reason != EdgeRemoval::Removed {
            log::warn!("Pruned edge {} ({:?})", edge.id, reason);
        }
        self.events.push(StoreEvent::EdgeRemoved {
            edge: edge.clone(),
            reason,
        });
        Some(edge)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges feeding `target` on `target_handle`, in insertion order
    pub fn edges_into<'a>(
        &'a self,
        target: &'a str,
        target_handle: &'a str,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.target == target && e.target_handle == target_handle)
    }

    /// Edges leaving `source` on any handle
    pub fn edges_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == source)
    }

    pub fn lookup(&self) -> &StringLookup {
        &self.lookup
    }

    pub fn lookup_mut(&mut self) -> &mut StringLookup {
        &mut self.lookup
    }

    pub fn is_refreshable(&self, node_type: &str) -> bool {
        self.refreshable.contains(node_type)
    }

    /// Mark refreshable nodes one hop downstream of `source` with `refresh: true`
    pub fn ping_outputs(&mut self, source: &str) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = Vec::new();
        for edge in self.edges_from(source) {
            if !targets.contains(&edge.target) {
                targets.push(edge.target.clone());
            }
        }

        targets.retain(|id| {
            self.nodes
                .get(id)
                .is_some_and(|node| self.is_refreshable(&node.node_type))
        });

        let mut pinged = Vec::new();
        for target in targets {
            let Some(node) = self.nodes.get_mut(&target) else {
                continue;
            };
            node.data.insert("refresh".to_string(), Value::Bool(true));
            self.events.push(StoreEvent::RefreshRequested(target.clone()));
            pinged.push(target);
        }

        if !pinged.is_empty() {
            log::debug!("Node {} pinged {:?}", source, pinged);
        }
        pinged
    }

    /// Reset a node's refresh flag once it has re-pulled
    pub fn clear_refresh(&mut self, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.data.insert("refresh".to_string(), Value::Bool(false));
        }
    }

    /// Drain the notification list
    pub fn take_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }
}
