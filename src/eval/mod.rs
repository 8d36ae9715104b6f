// SPDX-License-Identifier: MIT

//! Evaluators and the orchestrator that runs them
//!
//! This module provides the core `Evaluator` trait and implementations:
//! - `FnEvaluator` / `ProcessEvaluator` - code evaluators
//! - `LlmJudgeEvaluator` - LLM-graded evaluator backed by a `Judge`
//! - `EvalOrchestrator` - concurrent runs merged by response uid

pub mod code;
pub mod llm;
pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod response;

pub use code::{FnEvaluator, ProcessEvaluator};
pub use llm::{CommandJudge, Judge, LlmJudgeEvaluator};
pub use merge::{merge_eval_results, MergeConflict, MergeOutcome, NamedResults};
pub use orchestrator::{EvalOrchestrator, EvalRun, EvaluatorFailure};
pub use progress::{EvalEvent, Progress, ProgressBoard, ProgressReporter};
pub use registry::EvaluatorRegistry;
pub use response::{EvalResultType, EvalResults, LLMResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EvalError;
use crate::identity::try_batch_by_uid;

/// Implementation family of an evaluator
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    Code,
    Llm,
}

/// An evaluator as stored on its container node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EvaluatorDescriptor {
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EvaluatorKind,
    /// Implementation settings (code, command, grader prompt, ...)
    #[serde(default)]
    pub state: Map<String, Value>,
    /// Populated while running, cleared on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl EvaluatorDescriptor {
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        kind: EvaluatorKind,
        state: Value,
    ) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            kind,
            state: match state {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            progress: None,
        }
    }

    pub fn state_str(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(Value::as_str)
    }
}

/// Result shape of code evaluators: scored responses or an error
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeEvalResult {
    pub responses: Option<Vec<LLMResponse>>,
    pub error: Option<String>,
}

/// What an evaluator returns, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutput {
    /// Possibly unbatched: one record per response text
    Code(CodeEvalResult),
    /// Batched: one record per prompt with one item per response
    Llm(Vec<LLMResponse>),
}

impl EvalOutput {
    /// Normalize to batched records keyed by uid. Scores that do not
    /// line up one-to-one with responses are an error.
    pub fn into_batched(self, evaluator: &str) -> Result<Vec<LLMResponse>, EvalError> {
        let responses = match self {
            EvalOutput::Code(CodeEvalResult {
                error: Some(message),
                ..
            }) => {
                return Err(EvalError::Code {
                    evaluator: evaluator.to_string(),
                    message,
                })
            }
            EvalOutput::Code(CodeEvalResult {
                responses: Some(responses),
                ..
            }) => responses,
            EvalOutput::Code(_) => {
                return Err(EvalError::Code {
                    evaluator: evaluator.to_string(),
                    message: "evaluator returned neither responses nor an error".to_string(),
                })
            }
            EvalOutput::Llm(responses) => responses,
        };

        try_batch_by_uid(responses).map_err(|e| EvalError::Code {
            evaluator: evaluator.to_string(),
            message: e.to_string(),
        })
    }
}

/// Core trait for evaluator implementations
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Display name; merged scores are keyed by it
    fn name(&self) -> &str;

    fn kind(&self) -> EvaluatorKind;

    /// Score every response in `inputs`
    async fn run(
        &self,
        inputs: &[LLMResponse],
        progress: &ProgressReporter,
    ) -> Result<EvalOutput, EvalError>;
}
