// SPDX-License-Identifier: MIT

//! LLM-graded evaluators
//!
//! A `Judge` is the seam to whatever model answers grading prompts; the
//! evaluator builds one grading prompt per response and parses each
//! answer into a score.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::error::Error;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::progress::ProgressReporter;
use super::response::{EvalResults, LLMResponse};
use super::{EvalOutput, Evaluator, EvaluatorKind};
use crate::error::EvalError;
use crate::template::PromptTemplate;

/// A model that answers grading prompts
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;

    async fn grade(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Build the grading prompt for one response.
///
/// `{input}` is the response text and `{prompt}` the prompt that produced
/// it; other `{var}`s come from the record's vars and `{#meta}` from its
/// metavars. Without an `{input}` placeholder the response is appended
/// in a fenced block.
pub fn grading_prompt(grader: &PromptTemplate, record: &LLMResponse, response: &str) -> String {
    let filled = grader.render(|name, is_meta| {
        if is_meta {
            return record.metavars.get(name).cloned();
        }
        match name {
            "input" => Some(response.to_string()),
            "prompt" => Some(record.prompt.clone()),
            other => record.vars.get(other).cloned(),
        }
    });

    if grader.var_names().iter().any(|v| v == "input") {
        filled
    } else {
        format!("{}\n```\n{}\n```", filled.trim_end(), response)
    }
}

/// Turn a judge's answer into a score: booleans and numbers are typed,
/// everything else stays text
pub fn parse_answer(answer: &str) -> Value {
    let trimmed = answer.trim();
    match trimmed.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(n);
    }
    Value::String(trimmed.to_string())
}

/// Evaluator asking a judge to grade every response
pub struct LlmJudgeEvaluator {
    name: String,
    grader: PromptTemplate,
    judge: Arc<dyn Judge>,
    concurrency: usize,
}

impl LlmJudgeEvaluator {
    pub fn new(
        name: impl Into<String>,
        grader_prompt: &str,
        judge: Arc<dyn Judge>,
        concurrency: usize,
    ) -> Self {
        Self {
            name: name.into(),
            grader: PromptTemplate::parse(grader_prompt),
            judge,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Evaluator for LlmJudgeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Llm
    }

    async fn run(
        &self,
        inputs: &[LLMResponse],
        progress: &ProgressReporter,
    ) -> Result<EvalOutput, EvalError> {
        let total: usize = inputs.iter().map(|r| r.responses.len()).sum();
        log::info!(
            "Evaluator {} grading {} responses with judge {}",
            self.name,
            total,
            self.judge.name()
        );

        let jobs: Vec<(usize, usize, String)> = inputs
            .iter()
            .enumerate()
            .flat_map(|(ri, record)| {
                record
                    .responses
                    .iter()
                    .enumerate()
                    .map(move |(ti, text)| (ri, ti, grading_prompt(&self.grader, record, text)))
            })
            .collect();

        let mut scores: Vec<Vec<Option<Value>>> = inputs
            .iter()
            .map(|r| vec![None; r.responses.len()])
            .collect();

        let mut grades = stream::iter(jobs.into_iter().map(|(ri, ti, prompt)| {
            let judge = self.judge.clone();
            async move { (ri, ti, judge.grade(&prompt).await) }
        }))
        .buffer_unordered(self.concurrency);

        let (mut succeeded, mut failed) = (0usize, 0usize);
        let mut first_error: Option<String> = None;
        while let Some((ri, ti, result)) = grades.next().await {
            match result {
                Ok(answer) => {
                    scores[ri][ti] = Some(parse_answer(&answer));
                    succeeded += 1;
                }
                Err(e) => {
                    log::error!("Evaluator {} failed grading {}: {}", self.name, inputs[ri].uid, e);
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
            progress.report_counts(succeeded, failed, total);
        }

        if failed > 0 {
            return Err(EvalError::Judge {
                evaluator: self.name.clone(),
                failed,
                total,
                message: first_error.unwrap_or_default(),
            });
        }

        let graded = inputs
            .iter()
            .zip(scores)
            .map(|(record, items)| {
                let mut record = record.clone();
                let items: Vec<Value> = items.into_iter().flatten().collect();
                record.eval_res = Some(EvalResults::inferred(items));
                record
            })
            .collect();

        Ok(EvalOutput::Llm(graded))
    }
}

/// Judge backed by an external command: prompt on stdin, answer on stdout
pub struct CommandJudge {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandJudge {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Judge for CommandJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn grade(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or("judge stdin not captured")?;
        let prompt = prompt.to_string();
        let writer = tokio::spawn(async move {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = writer.await {
            log::debug!("Judge {} stdin closed early: {}", self.name, e);
        }

        if !output.status.success() {
            return Err(format!(
                "judge {} exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
