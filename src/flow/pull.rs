// SPDX-License-Identifier: MIT

//! Pull engine
//!
//! Walks edges backwards from a node to bind each declared input
//! variable to the values produced upstream. When an upstream node
//! itself declares `data.vars`, the walk continues through it, so a node
//! sees the whole templated chain feeding it.

use super::resolver::resolve_node;
use super::store::{EdgeRemoval, GraphStore};
use super::types::{NodeId, PulledBindings};
use crate::error::FlowError;
use crate::identity::VarNameSet;

/// An edge the walk found unusable and that should leave the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedEdge {
    pub edge_id: String,
    pub reason: EdgeRemoval,
}

/// Pull the declared inputs of `target` and prune any stale or dangling
/// edges met along the way.
///
/// Pruning happens even when the walk fails, so a broken graph heals
/// before the error reaches the user.
pub fn pull_input_data(
    store: &mut GraphStore,
    handles: &[String],
    target: &str,
) -> Result<PulledBindings, FlowError> {
    let mut pruned = Vec::new();
    let result = collect_input_data(store, handles, target, &mut pruned);

    for edge in pruned {
        store.prune_edge(&edge.edge_id, edge.reason);
    }

    result
}

/// Read-only half of [`pull_input_data`]: bindings plus the edges to prune
pub fn collect_input_data(
    store: &GraphStore,
    handles: &[String],
    target: &str,
    pruned: &mut Vec<PrunedEdge>,
) -> Result<PulledBindings, FlowError> {
    let mut walker = Walker {
        store,
        seen: VarNameSet::new(),
        path: Vec::new(),
        bindings: PulledBindings::new(),
        pruned,
    };
    walker.walk(handles, target)?;
    Ok(walker.bindings)
}

struct Walker<'s, 'p> {
    store: &'s GraphStore,
    /// Names bound anywhere in the upstream closure so far
    seen: VarNameSet,
    /// Node ids on the current DFS path
    path: Vec<NodeId>,
    bindings: PulledBindings,
    pruned: &'p mut Vec<PrunedEdge>,
}

impl Walker<'_, '_> {
    fn walk(&mut self, handles: &[String], target: &str) -> Result<(), FlowError> {
        if self.path.iter().any(|id| id == target) {
            let mut path = self.path.clone();
            path.push(target.to_string());
            return Err(FlowError::CyclicGraph { path });
        }
        self.path.push(target.to_string());

        let store = self.store;
        for name in handles {
            let mut bound_here = false;

            for edge in store.edges_into(target, name) {
                let Some(source) = store.node(&edge.source) else {
                    log::warn!(
                        "Edge {} points at missing node {}; pruning",
                        edge.id,
                        edge.source
                    );
                    self.prune(&edge.id, EdgeRemoval::MissingSource);
                    continue;
                };

                let Some(values) = resolve_node(source, &edge.source_handle, store.lookup())
                else {
                    log::warn!(
                        "Node {} has no output '{}'; pruning edge {}",
                        source.id,
                        edge.source_handle,
                        edge.id
                    );
                    self.prune(&edge.id, EdgeRemoval::UnresolvedHandle);
                    continue;
                };

                if !bound_here {
                    if !self.seen.insert(name) {
                        return Err(FlowError::duplicate_name(name.as_str(), target));
                    }
                    bound_here = true;
                }

                log::debug!(
                    "Bound {} value(s) to '{}' from {}.{}",
                    values.len(),
                    name,
                    source.id,
                    edge.source_handle
                );
                self.bindings.entry(name.clone()).or_default().extend(values);

                let upstream = source.declared_vars();
                if !upstream.is_empty() {
                    self.walk(&upstream, &source.id)?;
                }
            }
        }

        self.path.pop();
        Ok(())
    }

    fn prune(&mut self, edge_id: &str, reason: EdgeRemoval) {
        self.pruned.push(PrunedEdge {
            edge_id: edge_id.to_string(),
            reason,
        });
    }
}
