// SPDX-License-Identifier: MIT

//! Merging of per-evaluator results into one record per response uid
//!
//! Every evaluator's output must already be batched by uid. Merged
//! records carry one object per response, mapping evaluator name to
//! that evaluator's score.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::response::{EvalResultType, EvalResults, LLMResponse};

/// Batched results of one evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct NamedResults {
    pub evaluator: String,
    pub responses: Vec<LLMResponse>,
}

/// An evaluator scored a different number of responses for a uid than
/// the evaluators merged before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub uid: String,
    pub evaluator: String,
    pub expected: usize,
    pub found: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// One merged record per uid, in first-seen order
    pub responses: Vec<LLMResponse>,
    pub conflicts: Vec<MergeConflict>,
}

/// Scalar scores stay as they are; objects and arrays are stored as
/// their JSON text
pub fn score_or_string(item: &Value) -> Value {
    match item {
        Value::Number(_) | Value::Bool(_) | Value::String(_) | Value::Null => item.clone(),
        other => Value::String(other.to_string()),
    }
}

/// Merge evaluator results keyed strictly by uid
pub fn merge_eval_results(results: Vec<NamedResults>) -> MergeOutcome {
    let mut merged: Vec<LLMResponse> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut conflicts = Vec::new();

    for NamedResults {
        evaluator,
        responses,
    } in results
    {
        for resp in responses {
            let Some(eval) = resp.eval_res.as_ref() else {
                log::warn!(
                    "Evaluator {} returned record {} without scores; skipping",
                    evaluator,
                    resp.uid
                );
                continue;
            };

            let Some(&pos) = index.get(&resp.uid) else {
                let items = eval
                    .items
                    .iter()
                    .map(|item| keyed_score(&evaluator, item))
                    .collect();
                let mut record = resp.clone();
                record.eval_res = Some(EvalResults {
                    items,
                    dtype: EvalResultType::KeyValueMixed,
                });
                index.insert(record.uid.clone(), merged.len());
                merged.push(record);
                continue;
            };

            let existing = merged[pos]
                .eval_res
                .get_or_insert_with(|| EvalResults {
                    items: Vec::new(),
                    dtype: EvalResultType::KeyValueMixed,
                });

            if existing.items.len() != eval.items.len() {
                log::error!(
                    "Evaluator {} scored {} responses for {} but earlier evaluators scored {}; \
                     skipping its results for this record",
                    evaluator,
                    eval.items.len(),
                    resp.uid,
                    existing.items.len()
                );
                conflicts.push(MergeConflict {
                    uid: resp.uid.clone(),
                    evaluator: evaluator.clone(),
                    expected: existing.items.len(),
                    found: eval.items.len(),
                });
                continue;
            }

            for (slot, item) in existing.items.iter_mut().zip(&eval.items) {
                match slot {
                    Value::Object(scores) => {
                        scores.insert(evaluator.clone(), score_or_string(item));
                    }
                    other => *other = keyed_score(&evaluator, item),
                }
            }
        }
    }

    MergeOutcome {
        responses: merged,
        conflicts,
    }
}

fn keyed_score(evaluator: &str, item: &Value) -> Value {
    let mut scores = Map::new();
    scores.insert(evaluator.to_string(), score_or_string(item));
    Value::Object(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scored(uid: &str, texts: &[&str], items: Vec<Value>) -> LLMResponse {
        let mut resp = LLMResponse::new(uid, texts.iter().map(|s| s.to_string()).collect());
        resp.eval_res = Some(EvalResults::inferred(items));
        resp
    }

    fn named(evaluator: &str, responses: Vec<LLMResponse>) -> NamedResults {
        NamedResults {
            evaluator: evaluator.to_string(),
            responses,
        }
    }

    #[test]
    fn test_two_evaluators_merge_per_item() {
        let outcome = merge_eval_results(vec![
            named("A", vec![scored("x", &["r1", "r2"], vec![json!(1), json!(0)])]),
            named("len", vec![scored("x", &["r1", "r2"], vec![json!(2), json!(2)])]),
        ]);

        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.responses.len(), 1);
        let eval = outcome.responses[0].eval_res.as_ref().unwrap();
        assert_eq!(eval.dtype, EvalResultType::KeyValueMixed);
        assert_eq!(
            eval.items,
            vec![json!({"A": 1, "len": 2}), json!({"A": 0, "len": 2})]
        );
        assert_eq!(outcome.responses[0].responses, vec!["r1", "r2"]);
    }

    #[test]
    fn test_merge_is_idempotent_for_repeated_evaluator() {
        let results = named("A", vec![scored("x", &["r1", "r2"], vec![json!(1), json!(0)])]);

        let once = merge_eval_results(vec![results.clone()]);
        let twice = merge_eval_results(vec![results.clone(), results]);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_count_mismatch_skips_only_that_contribution() {
        let outcome = merge_eval_results(vec![
            named(
                "A",
                vec![
                    scored("x", &["r1", "r2", "r3"], vec![json!(1), json!(2), json!(3)]),
                    scored("y", &["q1"], vec![json!(true)]),
                ],
            ),
            named(
                "B",
                vec![
                    scored("x", &["r1", "r2"], vec![json!(9), json!(9)]),
                    scored("y", &["q1"], vec![json!("ok")]),
                ],
            ),
        ]);

        assert_eq!(
            outcome.conflicts,
            vec![MergeConflict {
                uid: "x".to_string(),
                evaluator: "B".to_string(),
                expected: 3,
                found: 2,
            }]
        );

        let x = &outcome.responses[0];
        assert_eq!(x.eval_res.as_ref().unwrap().items[0], json!({"A": 1}));

        let y = &outcome.responses[1];
        assert_eq!(
            y.eval_res.as_ref().unwrap().items,
            vec![json!({"A": true, "B": "ok"})]
        );
    }

    #[test]
    fn test_merge_is_keyed_by_uid_not_position() {
        let outcome = merge_eval_results(vec![
            named(
                "A",
                vec![
                    scored("x", &["r"], vec![json!(1)]),
                    scored("y", &["q"], vec![json!(2)]),
                ],
            ),
            named(
                "B",
                vec![
                    scored("y", &["q"], vec![json!(20)]),
                    scored("x", &["r"], vec![json!(10)]),
                ],
            ),
        ]);

        let by_uid: HashMap<&str, &Value> = outcome
            .responses
            .iter()
            .map(|r| (r.uid.as_str(), &r.eval_res.as_ref().unwrap().items[0]))
            .collect();
        assert_eq!(by_uid["x"], &json!({"A": 1, "B": 10}));
        assert_eq!(by_uid["y"], &json!({"A": 2, "B": 20}));
    }

    #[test]
    fn test_unscored_records_are_skipped() {
        let outcome = merge_eval_results(vec![named(
            "A",
            vec![LLMResponse::new("x", vec!["r".to_string()])],
        )]);
        assert!(outcome.responses.is_empty());
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_structured_scores_become_text() {
        assert_eq!(score_or_string(&json!(3)), json!(3));
        assert_eq!(score_or_string(&json!(false)), json!(false));
        assert_eq!(score_or_string(&json!("pass")), json!("pass"));
        assert_eq!(score_or_string(&json!({"k": 1})), json!("{\"k\":1}"));
        assert_eq!(score_or_string(&json!([1, 2])), json!("[1,2]"));
    }
}
