// SPDX-License-Identifier: MIT

//! Response identity and variable naming utilities

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::eval::response::{EvalResults, LLMResponse};

/// Fresh stable identity for a logical response record
pub fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Case-insensitive set of variable names
#[derive(Debug, Clone, Default)]
pub struct VarNameSet {
    names: HashSet<String>,
}

impl VarNameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a name; returns false if it (in any casing) was already present
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A uid group whose scores do not line up one-to-one with its responses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {uid} has {items} scores for {responses} responses")]
pub struct MisalignedScores {
    pub uid: String,
    pub responses: usize,
    pub items: usize,
}

struct Group {
    record: LLMResponse,
    scored: bool,
    aligned: bool,
}

fn group_by_uid(responses: Vec<LLMResponse>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::with_capacity(responses.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for resp in responses {
        let scored = resp.eval_res.is_some();
        let aligned = resp.eval_len() == resp.responses.len() || !scored;

        let Some(&pos) = index.get(&resp.uid) else {
            index.insert(resp.uid.clone(), groups.len());
            groups.push(Group {
                record: resp,
                scored,
                aligned,
            });
            continue;
        };

        let group = &mut groups[pos];
        // Mixing scored and unscored members would shift scores onto the wrong response
        group.aligned &= aligned && group.scored == scored;
        let existing = &mut group.record;
        existing.responses.extend(resp.responses);
        if let Some(new) = resp.eval_res {
            match existing.eval_res.as_mut() {
                Some(acc) => acc.items.extend(new.items),
                None => existing.eval_res = Some(new),
            }
        }
    }

    groups
}

fn misaligned(record: &LLMResponse) -> MisalignedScores {
    MisalignedScores {
        uid: record.uid.clone(),
        responses: record.responses.len(),
        items: record.eval_len(),
    }
}

/// Regroup records sharing a uid into one record, in first-seen order.
///
/// `responses` and `eval_res.items` are concatenated in encounter
/// order, which makes this the inverse of [`unbatch`]. A group whose
/// scores do not match its responses one-to-one loses its `eval_res`.
pub fn batch_by_uid(responses: Vec<LLMResponse>) -> Vec<LLMResponse> {
    group_by_uid(responses)
        .into_iter()
        .map(|group| {
            let mut record = group.record;
            if !group.aligned {
                log::error!("{}; dropping its scores", misaligned(&record));
                record.eval_res = None;
            }
            record
        })
        .collect()
}

/// Like [`batch_by_uid`], but a misaligned group is an error
pub fn try_batch_by_uid(responses: Vec<LLMResponse>) -> Result<Vec<LLMResponse>, MisalignedScores> {
    group_by_uid(responses)
        .into_iter()
        .map(|group| {
            if group.aligned {
                Ok(group.record)
            } else {
                Err(misaligned(&group.record))
            }
        })
        .collect()
}

/// Split each record into one record per response text, keeping the uid.
///
/// Eval items are split alongside when there is one per response;
/// otherwise they are dropped.
pub fn unbatch(responses: Vec<LLMResponse>) -> Vec<LLMResponse> {
    let mut out = Vec::new();

    for mut resp in responses {
        let texts = std::mem::take(&mut resp.responses);
        let eval = resp.eval_res.take();
        let eval = match eval {
            Some(e) if e.items.len() == texts.len() => Some(e),
            Some(e) => {
                log::warn!(
                    "Record {} has {} eval items for {} responses; dropping them",
                    resp.uid,
                    e.items.len(),
                    texts.len()
                );
                None
            }
            None => None,
        };

        for (i, text) in texts.into_iter().enumerate() {
            let mut single = resp.clone();
            single.responses = vec![text];
            single.eval_res = eval.as_ref().map(|e| EvalResults {
                items: vec![e.items[i].clone()],
                dtype: e.dtype,
            });
            out.push(single);
        }
    }

    out
}
