// SPDX-License-Identifier: MIT

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::code::{FnEvaluator, ProcessEvaluator, ScoreFn};
use super::llm::{Judge, LlmJudgeEvaluator};
use super::response::LLMResponse;
use super::{Evaluator, EvaluatorDescriptor, EvaluatorKind};
use crate::error::EvalError;

const DEFAULT_GRADER: &str = "default";

/// Named judges and code functions that evaluator descriptors refer to
#[derive(Clone)]
pub struct EvaluatorRegistry {
    judges: Arc<RwLock<HashMap<String, Arc<dyn Judge>>>>,
    code_fns: Arc<RwLock<HashMap<String, ScoreFn>>>,
    grade_concurrency: usize,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            judges: Arc::new(RwLock::new(HashMap::new())),
            code_fns: Arc::new(RwLock::new(HashMap::new())),
            grade_concurrency: 4,
        }
    }

    /// Registry preloaded with `length`, `word_count` and `is_json`
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        registry
            .register_code("length", |_: &LLMResponse, text: &str| {
                Ok(json!(text.chars().count()))
            })
            .await;
        registry
            .register_code("word_count", |_: &LLMResponse, text: &str| {
                Ok(json!(text.split_whitespace().count()))
            })
            .await;
        registry
            .register_code("is_json", |_: &LLMResponse, text: &str| {
                Ok(json!(serde_json::from_str::<Value>(text).is_ok()))
            })
            .await;
        registry
    }

    pub fn with_grade_concurrency(mut self, concurrency: usize) -> Self {
        self.grade_concurrency = concurrency.max(1);
        self
    }

    /// Register a judge under its own name
    pub async fn register_judge(&self, judge: Arc<dyn Judge>) {
        let mut judges = self.judges.write().await;
        judges.insert(judge.name().to_string(), judge);
    }

    pub async fn get_judge(&self, name: &str) -> Option<Arc<dyn Judge>> {
        let judges = self.judges.read().await;
        judges.get(name).cloned()
    }

    /// Register an in-process code function
    pub async fn register_code<F>(&self, name: &str, func: F)
    where
        F: Fn(&LLMResponse, &str) -> Result<Value, String> + Send + Sync + 'static,
    {
        let mut code_fns = self.code_fns.write().await;
        code_fns.insert(name.to_string(), Arc::new(func));
    }

    pub async fn get_code(&self, name: &str) -> Option<ScoreFn> {
        let code_fns = self.code_fns.read().await;
        code_fns.get(name).cloned()
    }

    /// Turn a descriptor into a runnable evaluator.
    ///
    /// Code descriptors use `state.builtin` (a registered function) or
    /// `state.command` (string or list); LLM descriptors use
    /// `state.prompt` and optionally `state.grader` (judge name).
    pub async fn build(&self, desc: &EvaluatorDescriptor) -> Result<Arc<dyn Evaluator>, EvalError> {
        match desc.kind {
            EvaluatorKind::Code => {
                if let Some(builtin) = desc.state_str("builtin") {
                    let func = self.get_code(builtin).await.ok_or_else(|| {
                        EvalError::invalid(&desc.name, format!("unknown builtin '{}'", builtin))
                    })?;
                    return Ok(Arc::new(FnEvaluator::from_arc(&desc.name, func)));
                }

                if let Some(command) = desc.state.get("command") {
                    let (program, args) = parse_command(command).ok_or_else(|| {
                        EvalError::invalid(&desc.name, "empty or malformed command")
                    })?;
                    return Ok(Arc::new(ProcessEvaluator::new(&desc.name, program, args)));
                }

                Err(EvalError::invalid(
                    &desc.name,
                    "code evaluator needs `builtin` or `command`",
                ))
            }
            EvaluatorKind::Llm => {
                let prompt = desc
                    .state_str("prompt")
                    .ok_or_else(|| EvalError::invalid(&desc.name, "LLM evaluator needs `prompt`"))?;
                let grader = desc.state_str("grader").unwrap_or(DEFAULT_GRADER);
                let judge = self
                    .get_judge(grader)
                    .await
                    .ok_or_else(|| EvalError::UnknownJudge(grader.to_string()))?;
                Ok(Arc::new(LlmJudgeEvaluator::new(
                    &desc.name,
                    prompt,
                    judge,
                    self.grade_concurrency,
                )))
            }
        }
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `"prog a b"` or `["prog", "a", "b"]` -> `("prog", ["a", "b"])`
fn parse_command(command: &Value) -> Option<(String, Vec<String>)> {
    let parts: Vec<String> = match command {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        _ => return None,
    };
    let (program, args) = parts.split_first()?;
    Some((program.clone(), args.to_vec()))
}
