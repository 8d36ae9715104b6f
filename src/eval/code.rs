// SPDX-License-Identifier: MIT

//! Code evaluators
//!
//! Both implementations score each response text on its own and return
//! unbatched records (one per response); the orchestrator regroups them
//! by uid.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use super::progress::ProgressReporter;
use super::response::{EvalResults, LLMResponse};
use super::{CodeEvalResult, EvalOutput, Evaluator, EvaluatorKind};
use crate::error::EvalError;
use crate::identity::unbatch;

/// Scores one response text; the record gives access to prompt and vars
pub type ScoreFn = Arc<dyn Fn(&LLMResponse, &str) -> Result<Value, String> + Send + Sync>;

/// In-process code evaluator wrapping a Rust closure
pub struct FnEvaluator {
    name: String,
    func: ScoreFn,
}

impl FnEvaluator {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&LLMResponse, &str) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::from_arc(name, Arc::new(func))
    }

    pub fn from_arc(name: impl Into<String>, func: ScoreFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl Evaluator for FnEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Code
    }

    async fn run(
        &self,
        inputs: &[LLMResponse],
        progress: &ProgressReporter,
    ) -> Result<EvalOutput, EvalError> {
        let mut singles = unbatch(inputs.to_vec());
        let total = singles.len();

        for (i, single) in singles.iter_mut().enumerate() {
            let text = single.responses.first().cloned().unwrap_or_default();
            match (self.func)(single, &text) {
                Ok(score) => {
                    single.eval_res = Some(EvalResults::inferred(vec![score]));
                    progress.report_counts(i + 1, 0, total);
                }
                Err(message) => {
                    progress.report_counts(i, 1, total);
                    return Ok(EvalOutput::Code(CodeEvalResult {
                        responses: None,
                        error: Some(format!("response {} of {}: {}", i + 1, total, message)),
                    }));
                }
            }
        }

        Ok(EvalOutput::Code(CodeEvalResult {
            responses: Some(singles),
            error: None,
        }))
    }
}

/// Code evaluator running an external command.
///
/// The command receives one JSON object per line on stdin
/// (`uid`, `prompt`, `text`, `vars`, `metavars`, `llm`) and must print one
/// score per line on stdout, in the same order. Lines that are not JSON
/// are taken as text scores.
pub struct ProcessEvaluator {
    name: String,
    program: String,
    args: Vec<String>,
}

impl ProcessEvaluator {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    fn payload(singles: &[LLMResponse]) -> String {
        let mut payload = String::new();
        for single in singles {
            let line = json!({
                "uid": single.uid,
                "prompt": single.prompt,
                "text": single.responses.first().cloned().unwrap_or_default(),
                "vars": single.vars,
                "metavars": single.metavars,
                "llm": single.llm,
            });
            payload.push_str(&line.to_string());
            payload.push('\n');
        }
        payload
    }

    fn failed(message: String) -> EvalOutput {
        EvalOutput::Code(CodeEvalResult {
            responses: None,
            error: Some(message),
        })
    }
}

#[async_trait]
impl Evaluator for ProcessEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Code
    }

    async fn run(
        &self,
        inputs: &[LLMResponse],
        progress: &ProgressReporter,
    ) -> Result<EvalOutput, EvalError> {
        let mut singles = unbatch(inputs.to_vec());
        let total = singles.len();

        log::info!(
            "Evaluator {} scoring {} responses with {}",
            self.name,
            total,
            self.program
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EvalError::process(&self.name, format!("failed to spawn {}: {}", self.program, e))
            })?;

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(EvalError::process(&self.name, "child stdio not captured"));
        };

        // Feed stdin from its own task so a chatty child cannot deadlock us
        let payload = Self::payload(&singles);
        let writer = tokio::spawn(async move {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.shutdown().await
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await.map(|_| buf)
        });

        let mut scores = Vec::with_capacity(total);
        let mut lines = LinesStream::new(BufReader::new(stdout).lines());
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| EvalError::process(&self.name, e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let score = serde_json::from_str::<Value>(line)
                .unwrap_or_else(|_| Value::String(line.to_string()));
            scores.push(score);
            progress.report_counts(scores.len().min(total), 0, total);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EvalError::process(&self.name, e.to_string()))?;

        if let Ok(Err(e)) = writer.await {
            // The child may exit without draining stdin
            log::debug!("Evaluator {} stdin closed early: {}", self.name, e);
        }
        let stderr = match stderr_reader.await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        };

        if !status.success() {
            progress.report_counts(0, total, total);
            return Ok(Self::failed(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        if scores.len() != total {
            progress.report_counts(0, total, total);
            return Ok(Self::failed(format!(
                "{} printed {} scores for {} responses",
                self.program,
                scores.len(),
                total
            )));
        }

        for (single, score) in singles.iter_mut().zip(scores) {
            single.eval_res = Some(EvalResults::inferred(vec![score]));
        }

        Ok(EvalOutput::Code(CodeEvalResult {
            responses: Some(singles),
            error: None,
        }))
    }
}
