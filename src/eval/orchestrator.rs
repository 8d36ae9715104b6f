// SPDX-License-Identifier: MIT

//! Concurrent evaluator runs
//!
//! All evaluators on a node start together and every outcome is
//! collected before merging, so one failing evaluator never discards
//! the scores of the others.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::merge::{merge_eval_results, MergeConflict, NamedResults};
use super::progress::{EvalEvent, ProgressBoard, ProgressReporter};
use super::registry::EvaluatorRegistry;
use super::response::LLMResponse;
use super::{Evaluator, EvaluatorDescriptor};
use crate::config::EngineConfig;
use crate::error::{EvalError, FlowError};

/// An evaluator that could not be built, failed or timed out
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorFailure {
    pub uid: String,
    pub name: String,
    pub error: EvalError,
}

/// Outcome of running every evaluator on a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalRun {
    /// Merged records of the evaluators that succeeded
    pub responses: Vec<LLMResponse>,
    /// Failures in descriptor order
    pub failures: Vec<EvaluatorFailure>,
    pub conflicts: Vec<MergeConflict>,
}

impl EvalRun {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct EvalOrchestrator {
    registry: EvaluatorRegistry,
    board: ProgressBoard,
    timeout: Option<Duration>,
}

impl EvalOrchestrator {
    pub fn new(registry: EvaluatorRegistry) -> Self {
        Self {
            registry,
            board: ProgressBoard::new(),
            timeout: None,
        }
    }

    pub fn from_config(registry: EvaluatorRegistry, config: &EngineConfig) -> Self {
        let registry = registry.with_grade_concurrency(config.grade_concurrency);
        let mut orchestrator = Self::new(registry);
        orchestrator.timeout = config.eval_timeout_secs.map(Duration::from_secs);
        orchestrator
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    /// Progress of the evaluators still running
    pub fn board(&self) -> &ProgressBoard {
        &self.board
    }

    /// Run all evaluators and merge their results; the first failure in
    /// descriptor order becomes the error
    pub async fn run_all(
        &self,
        descriptors: &[EvaluatorDescriptor],
        inputs: &[LLMResponse],
    ) -> Result<Vec<LLMResponse>, FlowError> {
        let run = self.run_all_detailed(descriptors, inputs).await;
        match run.failures.into_iter().next() {
            Some(failure) => Err(failure.error.into()),
            None => Ok(run.responses),
        }
    }

    /// Run all evaluators and report every failure next to the merged results
    pub async fn run_all_detailed(
        &self,
        descriptors: &[EvaluatorDescriptor],
        inputs: &[LLMResponse],
    ) -> EvalRun {
        self.run(descriptors, inputs, None).await
    }

    /// Like [`run_all_detailed`](Self::run_all_detailed), also sending
    /// progress and completion events to `events`
    pub async fn run_all_stream(
        &self,
        descriptors: &[EvaluatorDescriptor],
        inputs: &[LLMResponse],
        events: mpsc::UnboundedSender<EvalEvent>,
    ) -> EvalRun {
        self.run(descriptors, inputs, Some(events)).await
    }

    async fn run(
        &self,
        descriptors: &[EvaluatorDescriptor],
        inputs: &[LLMResponse],
        events: Option<mpsc::UnboundedSender<EvalEvent>>,
    ) -> EvalRun {
        log::info!(
            "Running {} evaluators over {} records",
            descriptors.len(),
            inputs.len()
        );

        let runs = descriptors.iter().map(|desc| {
            let reporter = ProgressReporter::new(&desc.uid, self.board.clone(), events.clone());
            async move {
                let result = self.run_one(desc, inputs, &reporter).await;
                reporter.finish(result.is_ok());
                result
            }
        });
        let outcomes = join_all(runs).await;

        let mut named = Vec::new();
        let mut failures = Vec::new();
        for (desc, outcome) in descriptors.iter().zip(outcomes) {
            match outcome {
                Ok(responses) => named.push(NamedResults {
                    evaluator: desc.name.clone(),
                    responses,
                }),
                Err(error) => {
                    log::error!("Evaluator {} ({}) failed: {}", desc.name, desc.uid, error);
                    failures.push(EvaluatorFailure {
                        uid: desc.uid.clone(),
                        name: desc.name.clone(),
                        error,
                    });
                }
            }
        }

        let merged = merge_eval_results(named);
        EvalRun {
            responses: merged.responses,
            failures,
            conflicts: merged.conflicts,
        }
    }

    async fn run_one(
        &self,
        desc: &EvaluatorDescriptor,
        inputs: &[LLMResponse],
        reporter: &ProgressReporter,
    ) -> Result<Vec<LLMResponse>, EvalError> {
        let evaluator: Arc<dyn Evaluator> = self.registry.build(desc).await?;
        reporter.report_counts(0, 0, inputs.len().max(1));

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, evaluator.run(inputs, reporter))
                .await
                .map_err(|_| EvalError::Timeout {
                    evaluator: desc.name.clone(),
                    secs: limit.as_secs(),
                })??,
            None => evaluator.run(inputs, reporter).await?,
        };

        let batched = output.into_batched(&desc.name)?;
        log::debug!("Evaluator {} scored {} records", desc.name, batched.len());
        Ok(batched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::llm::Judge;
    use crate::eval::EvaluatorKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::error::Error;

    struct SlowJudge;

    #[async_trait]
    impl Judge for SlowJudge {
        fn name(&self) -> &str {
            "slow"
        }

        async fn grade(&self, _prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("true".to_string())
        }
    }

    async fn registry() -> EvaluatorRegistry {
        let registry = EvaluatorRegistry::with_builtins().await;
        registry
            .register_code("first_char_a", |_: &LLMResponse, text: &str| {
                Ok(json!(text.starts_with('a') as u8))
            })
            .await;
        registry
            .register_code("broken", |_: &LLMResponse, _: &str| Err("boom".to_string()))
            .await;
        registry
    }

    fn code(uid: &str, name: &str, builtin: &str) -> EvaluatorDescriptor {
        EvaluatorDescriptor::new(uid, name, EvaluatorKind::Code, json!({"builtin": builtin}))
    }

    fn inputs() -> Vec<LLMResponse> {
        vec![LLMResponse::new(
            "x",
            vec!["ab".to_string(), "cd".to_string()],
        )]
    }

    #[tokio::test]
    async fn test_two_evaluators_merge() {
        let orchestrator = EvalOrchestrator::new(registry().await);
        let descriptors = vec![
            code("e1", "A", "first_char_a"),
            code("e2", "len", "length"),
        ];

        let merged = orchestrator.run_all(&descriptors, &inputs()).await.unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].eval_res.as_ref().unwrap().items,
            vec![json!({"A": 1, "len": 2}), json!({"A": 0, "len": 2})]
        );
        assert!(orchestrator.board().is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_other_results() {
        let orchestrator = EvalOrchestrator::new(registry().await);
        let descriptors = vec![code("e1", "bad", "broken"), code("e2", "len", "length")];

        let run = orchestrator.run_all_detailed(&descriptors, &inputs()).await;
        assert!(!run.is_ok());
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].uid, "e1");
        assert_eq!(
            run.responses[0].eval_res.as_ref().unwrap().items[0],
            json!({"len": 2})
        );

        let err = orchestrator.run_all(&descriptors, &inputs()).await.unwrap_err();
        assert!(matches!(err, FlowError::Evaluator(EvalError::Code { .. })));
        assert!(orchestrator.board().is_empty());
    }

    #[tokio::test]
    async fn test_unbuildable_descriptor_is_a_failure() {
        let orchestrator = EvalOrchestrator::new(registry().await);
        let descriptors = vec![
            EvaluatorDescriptor::new("e1", "judge", EvaluatorKind::Llm, json!({"prompt": "ok?"})),
            code("e2", "len", "length"),
        ];

        let run = orchestrator.run_all_detailed(&descriptors, &inputs()).await;
        assert_eq!(
            run.failures[0].error,
            EvalError::UnknownJudge("default".to_string())
        );
        assert_eq!(run.responses.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let registry = registry().await;
        registry.register_judge(Arc::new(SlowJudge)).await;
        let orchestrator =
            EvalOrchestrator::new(registry).with_timeout(Duration::from_millis(50));
        let descriptors = vec![EvaluatorDescriptor::new(
            "e1",
            "slow",
            EvaluatorKind::Llm,
            json!({"prompt": "{input}", "grader": "slow"}),
        )];

        let run = orchestrator.run_all_detailed(&descriptors, &inputs()).await;
        assert!(matches!(
            run.failures[0].error,
            EvalError::Timeout { .. }
        ));
        assert!(run.responses.is_empty());
        assert!(orchestrator.board().is_empty());
    }

    #[tokio::test]
    async fn test_stream_reports_completion() {
        let orchestrator = EvalOrchestrator::new(registry().await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = orchestrator
            .run_all_stream(&[code("e2", "len", "length")], &inputs(), tx)
            .await;
        assert!(run.is_ok());

        let mut finished = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EvalEvent::Finished { evaluator, ok } = event {
                finished.push((evaluator, ok));
            }
        }
        assert_eq!(finished, vec![("e2".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_no_evaluators() {
        let orchestrator = EvalOrchestrator::new(EvaluatorRegistry::new());
        assert!(orchestrator.run_all(&[], &inputs()).await.unwrap().is_empty());
    }
}
