// SPDX-License-Identifier: MIT

//! Flow graph: storage, output resolution and input pulling
//!
//! This module provides:
//! - `GraphStore` - owned nodes/edges with a notification list
//! - `resolve_output` - values a node exposes on an output handle
//! - `pull_input_data` - recursive binding of a node's declared inputs

pub mod loader;
pub mod lookup;
pub mod pull;
pub mod resolver;
pub mod store;
pub mod types;

pub use loader::{FlowDocument, FlowLoader};
pub use lookup::StringLookup;
pub use pull::{collect_input_data, pull_input_data, PrunedEdge};
pub use resolver::{resolve_output, Column, DataShape};
pub use store::{EdgeRemoval, GraphStore, StoreEvent};
pub use types::{Edge, Node, NodeId, PulledBindings, PulledValue, TemplateVarInfo};
