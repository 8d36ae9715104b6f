// SPDX-License-Identifier: MIT

//! Prompt permutation generation
//!
//! Fills a template with every combination of the values bound to its
//! variables. Values that came from the same table row (same
//! `associate_id`) stay together instead of being crossed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::parser::PromptTemplate;
use super::unescape_braces;
use crate::flow::types::{PulledBindings, PulledValue};

/// One concrete prompt produced from a template
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FilledPrompt {
    /// Filled text, brace escapes preserved
    pub text: String,
    /// Variable -> text it was filled with
    pub fill_history: BTreeMap<String, String>,
    /// Metadata merged from every value used
    pub metavars: BTreeMap<String, String>,
}

impl FilledPrompt {
    /// Text with brace escapes removed, ready to send to a model
    pub fn display_text(&self) -> String {
        unescape_braces(&self.text)
    }
}

#[derive(Clone, Default)]
struct FillState {
    history: BTreeMap<String, String>,
    metavars: BTreeMap<String, String>,
    associate_ids: Vec<String>,
}

/// Generate all prompts for `template` given pulled bindings.
///
/// Filled values are themselves scanned for references, so a value that
/// is an upstream template gets its own variables filled from the same
/// bindings. Variables with no bound values are left in place.
pub fn generate_prompts(template: &PromptTemplate, bindings: &PulledBindings) -> Vec<FilledPrompt> {
    let mut out = Vec::new();
    expand(template.source().to_string(), FillState::default(), bindings, &mut out);
    out
}

fn expand(text: String, state: FillState, bindings: &PulledBindings, out: &mut Vec<FilledPrompt>) {
    // Re-apply already chosen values to references introduced by the last fill
    let text = PromptTemplate::parse(&text).render(|name, is_meta| {
        if is_meta {
            None
        } else {
            state.history.get(name).cloned()
        }
    });
    let template = PromptTemplate::parse(&text);

    let next = template.var_names().into_iter().find(|name| {
        !state.history.contains_key(name)
            && bindings.get(name).is_some_and(|values| !values.is_empty())
    });

    let Some(var) = next else {
        let text = template.render(|name, is_meta| {
            if is_meta {
                state.metavars.get(name).cloned()
            } else {
                None
            }
        });
        out.push(FilledPrompt {
            text,
            fill_history: state.history,
            metavars: state.metavars,
        });
        return;
    };

    for value in candidates(&bindings[&var], &state.associate_ids) {
        let filled = template.render(|name, is_meta| {
            (!is_meta && name == var).then(|| value.text().to_string())
        });

        let mut next_state = state.clone();
        next_state
            .history
            .insert(var.clone(), value.text().to_string());
        if let Some(meta) = value.metavars() {
            next_state
                .metavars
                .extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(id) = value.associate_id() {
            next_state.associate_ids.push(id.to_string());
        }

        expand(filled, next_state, bindings, out);
    }
}

/// Values associated with an already chosen row, or all values if none are
fn candidates<'a>(values: &'a [PulledValue], associate_ids: &[String]) -> Vec<&'a PulledValue> {
    let associated: Vec<&PulledValue> = values
        .iter()
        .filter(|v| {
            v.associate_id()
                .is_some_and(|id| associate_ids.iter().any(|a| a == id))
        })
        .collect();

    if associated.is_empty() {
        values.iter().collect()
    } else {
        associated
    }
}
