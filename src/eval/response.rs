// SPDX-License-Identifier: MIT

//! Response records and evaluation results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::identity::new_uid;

/// A prior LLM response batch: one prompt, one or more response texts
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LLMResponse {
    /// Stable identity used to merge results from independent evaluators
    #[serde(default = "new_uid")]
    pub uid: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub metavars: BTreeMap<String, String>,
    #[serde(default)]
    pub llm: String,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_res: Option<EvalResults>,
}

impl LLMResponse {
    pub fn new(uid: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            uid: uid.into(),
            prompt: String::new(),
            vars: BTreeMap::new(),
            metavars: BTreeMap::new(),
            llm: String::new(),
            responses,
            eval_res: None,
        }
    }

    /// Number of eval items, or zero when unscored
    pub fn eval_len(&self) -> usize {
        self.eval_res.as_ref().map_or(0, |e| e.items.len())
    }
}

/// Per-response scores: one item per entry of `responses`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EvalResults {
    pub items: Vec<Value>,
    pub dtype: EvalResultType,
}

impl EvalResults {
    /// Wrap items, inferring their dtype
    pub fn inferred(items: Vec<Value>) -> Self {
        let dtype = EvalResultType::infer(&items);
        Self { items, dtype }
    }
}

/// Shape of the scores in an [`EvalResults`]
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum EvalResultType {
    KeyValue,
    #[serde(rename = "KeyValue_Numeric")]
    KeyValueNumeric,
    #[serde(rename = "KeyValue_Categorical")]
    KeyValueCategorical,
    #[serde(rename = "KeyValue_Mixed")]
    KeyValueMixed,
    Numeric,
    Categorical,
    Mixed,
    #[default]
    Unknown,
    Empty,
}

#[derive(Clone, Copy, PartialEq)]
enum ScalarKind {
    Number,
    Category,
    Other,
}

fn scalar_kind(value: &Value) -> ScalarKind {
    match value {
        Value::Number(_) => ScalarKind::Number,
        Value::Bool(_) | Value::String(_) => ScalarKind::Category,
        _ => ScalarKind::Other,
    }
}

/// Numeric / categorical / mixed classification of a set of scalars
fn classify<'a>(values: impl Iterator<Item = &'a Value>) -> Option<(bool, bool)> {
    let mut numeric = false;
    let mut categorical = false;
    for value in values {
        match scalar_kind(value) {
            ScalarKind::Number => numeric = true,
            ScalarKind::Category => categorical = true,
            ScalarKind::Other => return None,
        }
    }
    Some((numeric, categorical))
}

impl EvalResultType {
    /// Infer the dtype of a list of eval items
    pub fn infer(items: &[Value]) -> Self {
        if items.is_empty() {
            return EvalResultType::Empty;
        }

        if items.iter().all(Value::is_object) {
            let values = items
                .iter()
                .filter_map(Value::as_object)
                .flat_map(|obj| obj.values());
            return match classify(values) {
                Some((false, false)) => EvalResultType::KeyValue,
                Some((true, false)) => EvalResultType::KeyValueNumeric,
                Some((false, true)) => EvalResultType::KeyValueCategorical,
                _ => EvalResultType::KeyValueMixed,
            };
        }

        match classify(items.iter()) {
            Some((true, false)) => EvalResultType::Numeric,
            Some((false, true)) => EvalResultType::Categorical,
            Some((true, true)) => EvalResultType::Mixed,
            _ => EvalResultType::Unknown,
        }
    }
}
