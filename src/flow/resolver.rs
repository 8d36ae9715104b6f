// SPDX-License-Identifier: MIT

//! Output resolution
//!
//! Extracts the values a node exposes on an output handle. Node data is
//! classified by shape, never by node type, in this priority order:
//! tabular, then field list / field dict, then scalar-by-handle.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::lookup::StringLookup;
use super::store::GraphStore;
use super::types::{Node, PulledValue, TemplateVarInfo};
use crate::template::escape_braces;

/// Reserved row key carrying the row identity
pub const ROW_UID_KEY: &str = "__uid";

/// A table column: internal key plus display header
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub key: String,
    pub header: String,
}

/// The data layouts the resolver understands
#[derive(Debug, Clone)]
pub enum DataShape<'a> {
    Tabular {
        columns: Vec<Column>,
        rows: &'a [Value],
    },
    FieldList(&'a [Value]),
    FieldDict {
        fields: &'a Map<String, Value>,
        visibility: Option<&'a Map<String, Value>>,
    },
    Scalar(&'a Value),
}

impl<'a> DataShape<'a> {
    /// Classify a data record; first matching shape wins
    pub fn detect(data: &'a Map<String, Value>, handle: &str) -> Option<Self> {
        if let Some(tabular) = Self::detect_tabular(data) {
            return Some(tabular);
        }

        match data.get("fields") {
            Some(Value::Array(items)) => return Some(DataShape::FieldList(items)),
            Some(Value::Object(fields)) => {
                return Some(DataShape::FieldDict {
                    fields,
                    visibility: data.get("fields_visibility").and_then(Value::as_object),
                })
            }
            _ => {}
        }

        match data.get(handle) {
            None | Some(Value::Null) => None,
            Some(value) => Some(DataShape::Scalar(value)),
        }
    }

    fn detect_tabular(data: &'a Map<String, Value>) -> Option<Self> {
        let columns = data.get("columns")?.as_array()?;
        let rows = data
            .get("sel_rows")
            .and_then(Value::as_array)
            .or_else(|| data.get("rows").and_then(Value::as_array))?;

        let columns = columns
            .iter()
            .filter_map(|c| {
                Some(Column {
                    key: c.get("key")?.as_str()?.to_string(),
                    header: c.get("header")?.as_str()?.to_string(),
                })
            })
            .collect();

        Some(DataShape::Tabular { columns, rows })
    }
}

/// Resolve the values `node_id` exposes on `handle`.
///
/// Returns `None` when the node is missing or the handle matches no
/// column or field; callers treat that as "no data".
pub fn resolve_output(store: &GraphStore, node_id: &str, handle: &str) -> Option<Vec<PulledValue>> {
    let node = store.node(node_id)?;
    resolve_node(node, handle, store.lookup())
}

/// Resolve a handle against a single node's data
pub fn resolve_node(node: &Node, handle: &str, lookup: &StringLookup) -> Option<Vec<PulledValue>> {
    match DataShape::detect(&node.data, handle)? {
        DataShape::Tabular { columns, rows } => resolve_tabular(&columns, rows, handle),
        DataShape::FieldList(items) => Some(
            items
                .iter()
                .map(|v| PulledValue::Plain(lookup.resolve(v)))
                .collect(),
        ),
        DataShape::FieldDict { fields, visibility } => Some(
            fields
                .iter()
                .filter(|(id, _)| {
                    visibility
                        .and_then(|vis| vis.get(id.as_str()))
                        .and_then(Value::as_bool)
                        != Some(false)
                })
                .map(|(_, v)| PulledValue::Plain(lookup.resolve(v)))
                .collect(),
        ),
        DataShape::Scalar(value) => Some(resolve_scalar(value)),
    }
}

fn resolve_tabular(columns: &[Column], rows: &[Value], handle: &str) -> Option<Vec<PulledValue>> {
    let column = columns.iter().find(|c| c.header == handle)?;

    let values = rows
        .iter()
        .filter_map(Value::as_object)
        .filter(|row| !row_is_empty(row))
        .map(|row| {
            let metavars: BTreeMap<String, String> = columns
                .iter()
                .filter(|c| c.key != column.key)
                .map(|c| (c.header.clone(), cell_text(row.get(&c.key))))
                .collect();

            let associate_id = row
                .get(ROW_UID_KEY)
                .map(|uid| cell_text(Some(uid)))
                .filter(|uid| !uid.is_empty());

            PulledValue::Info(TemplateVarInfo {
                text: escape_braces(&cell_text(row.get(&column.key))),
                metavars,
                associate_id,
            })
        })
        .collect();

    Some(values)
}

/// A row is empty when every cell besides the uid is blank
fn row_is_empty(row: &Map<String, Value>) -> bool {
    row.iter()
        .filter(|(key, _)| key.as_str() != ROW_UID_KEY)
        .all(|(_, value)| cell_text(Some(value)).trim().is_empty())
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn resolve_scalar(value: &Value) -> Vec<PulledValue> {
    match value {
        Value::Array(items) => items.iter().map(scalar_item).collect(),
        other => vec![scalar_item(other)],
    }
}

fn scalar_item(value: &Value) -> PulledValue {
    match value {
        Value::Object(_) => match serde_json::from_value::<TemplateVarInfo>(value.clone()) {
            Ok(info) => PulledValue::Info(info),
            Err(_) => PulledValue::Plain(value.to_string()),
        },
        other => PulledValue::Plain(cell_text(Some(other))),
    }
}
