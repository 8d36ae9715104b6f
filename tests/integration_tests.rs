//! Integration tests for flow pulling, prompt generation and evaluation
//!
//! These tests drive whole flows through `FlowRunner` using mock judges,
//! mock evaluators and in-memory responses.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use promptgraph_rs::eval::{
    merge_eval_results, EvalEvent, EvalOrchestrator, EvalOutput, Evaluator, EvaluatorDescriptor,
    EvaluatorKind, EvaluatorRegistry, Judge, LLMResponse, NamedResults, ProgressReporter,
};
use promptgraph_rs::eval::{EvalResultType, EvalResults};
use promptgraph_rs::flow::{
    pull_input_data, EdgeRemoval, FlowDocument, FlowLoader, GraphStore, StoreEvent,
};
use promptgraph_rs::identity::{batch_by_uid, unbatch};
use promptgraph_rs::{EngineConfig, EvalError, FlowError, FlowRunner, MemoryResponses};
use serde_json::{json, Value};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Fixtures
// ============================================================================

/// Table of topics feeding a prompt, which feeds a second prompt
static TABLE_FLOW_YAML: Lazy<String> = Lazy::new(|| {
    r#"
nodes:
  - id: table
    type: table
    data:
      columns:
        - { key: c0, header: topic }
        - { key: c1, header: notes }
      rows:
        - { c0: cats, c1: "they purr", __uid: r1 }
        - { c0: "", c1: "", __uid: r2 }
        - { c0: dogs, c1: "they bark", __uid: r3 }
  - id: tone
    type: textfields
    data:
      fields: { f1: calm, f2: loud, f3: hidden }
      fields_visibility: { f3: false }
  - id: question
    type: prompt
    data:
      vars: [topic, tone]
      prompt: "Describe {topic} in a {tone} voice ({#notes})"
  - id: inspect
    type: inspect
    data: {}
edges:
  - { source: table, sourceHandle: topic, target: question, targetHandle: topic }
  - { source: tone, sourceHandle: output, target: question, targetHandle: tone }
  - { source: question, sourceHandle: prompt, target: inspect, targetHandle: input }
"#
    .to_string()
});

static TABLE_FLOW: Lazy<FlowDocument> =
    Lazy::new(|| FlowLoader::parse(&TABLE_FLOW_YAML).expect("fixture flow parses"));

fn runner_for(doc: FlowDocument, registry: EvaluatorRegistry) -> FlowRunner {
    FlowRunner::from_document(doc, EngineConfig::default(), registry)
}

// ============================================================================
// Mock Components
// ============================================================================

/// Mock judge answering "1" when the graded text mentions the keyword
struct KeywordJudge {
    name: String,
    keyword: String,
    calls: AtomicUsize,
}

impl KeywordJudge {
    fn new(name: &str, keyword: &str) -> Self {
        Self {
            name: name.to_string(),
            keyword: keyword.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Judge for KeywordJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn grade(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if prompt.contains(&self.keyword) { "1" } else { "0" }.to_string())
    }
}

/// Mock judge that is always unavailable
struct DownJudge;

#[async_trait]
impl Judge for DownJudge {
    fn name(&self) -> &str {
        "down"
    }

    async fn grade(&self, _prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        Err("service unavailable".into())
    }
}

/// Mock evaluator returning fixed batched scores
struct FixedEvaluator {
    name: String,
    items: Vec<Value>,
}

#[async_trait]
impl Evaluator for FixedEvaluator {
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
        let scored = inputs
            .iter()
            .map(|record| {
                let mut record = record.clone();
                record.eval_res = Some(EvalResults::inferred(self.items.clone()));
                record
            })
            .collect();
        progress.report_counts(inputs.len(), 0, inputs.len());
        Ok(EvalOutput::Llm(scored))
    }
}

fn responses_x() -> Vec<LLMResponse> {
    let mut record = LLMResponse::new("x", vec!["r1".to_string(), "r2".to_string()]);
    record.prompt = "Say something".to_string();
    record.llm = "gpt-mock".to_string();
    vec![record]
}

// ============================================================================
// Pull and Prompt Tests
// ============================================================================

#[test]
fn test_table_rows_resolve_with_metavars() {
    let mut store = GraphStore::from_document(TABLE_FLOW.clone(), ["inspect"]);
    let bindings = pull_input_data(&mut store, &["topic".to_string()], "question").unwrap();

    let topics = &bindings["topic"];
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[0].text(), "cats");
    assert_eq!(topics[0].metavars().unwrap()["notes"], "they purr");
    assert_eq!(topics[0].associate_id(), Some("r1"));
    assert_eq!(topics[1].text(), "dogs");
}

#[test]
fn test_prompts_cross_table_and_fields() {
    let mut runner = runner_for(TABLE_FLOW.clone(), EvaluatorRegistry::new());
    let prompts = runner.prompts("question").unwrap();

    let texts: Vec<String> = prompts.iter().map(|p| p.display_text()).collect();
    assert_eq!(
        texts,
        vec![
            "Describe cats in a calm voice (they purr)",
            "Describe cats in a loud voice (they purr)",
            "Describe dogs in a calm voice (they bark)",
            "Describe dogs in a loud voice (they bark)",
        ]
    );
    assert_eq!(prompts[3].fill_history["topic"], "dogs");
    assert_eq!(prompts[3].fill_history["tone"], "loud");
}

#[test]
fn test_chained_prompt_sees_upstream_vars() {
    let mut doc = TABLE_FLOW.clone();
    let downstream = FlowLoader::parse(
        r#"
nodes:
  - id: wrapper
    type: prompt
    data:
      vars: [question]
      prompt: "Be brief. {question}"
edges:
  - { source: question, sourceHandle: prompt, target: wrapper, targetHandle: question }
"#,
    )
    .unwrap();
    doc.nodes.extend(downstream.nodes);
    doc.edges.extend(downstream.edges);

    let mut runner = runner_for(doc, EvaluatorRegistry::new());
    let bindings = runner.pull("wrapper").unwrap();
    assert!(bindings.contains_key("question"));
    assert!(bindings.contains_key("topic"));
    assert!(bindings.contains_key("tone"));

    let prompts = runner.prompts("wrapper").unwrap();
    assert_eq!(prompts.len(), 4);
    assert_eq!(
        prompts[0].display_text(),
        "Be brief. Describe cats in a calm voice (they purr)"
    );
}

#[test]
fn test_removed_source_heals_flow() {
    let mut runner = runner_for(TABLE_FLOW.clone(), EvaluatorRegistry::new());
    runner.store_mut().remove_node("tone");
    runner.store_mut().take_events();

    let bindings = runner.pull("question").unwrap();
    assert!(!bindings.contains_key("tone"));
    assert_eq!(runner.store().edges_into("question", "tone").count(), 0);

    let events = runner.store_mut().take_events();
    assert!(events.iter().any(|e| matches!(
        e,
        StoreEvent::EdgeRemoved {
            reason: EdgeRemoval::MissingSource,
            ..
        }
    )));

    // The healed flow round-trips through the loader
    let path = std::env::temp_dir().join(format!("healed-{}.json", uuid::Uuid::new_v4()));
    let loader = FlowLoader::new();
    loader.save_flow(&path, &runner.to_document()).unwrap();
    let reloaded = loader.load_flow(&path).unwrap();
    assert_eq!(reloaded.edges.len(), 2);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_duplicate_names_across_branches() {
    let doc = FlowLoader::parse(
        r#"
nodes:
  - { id: a, type: textfields, data: { fields: [x] } }
  - { id: b, type: textfields, data: { fields: [y] } }
  - { id: p1, type: prompt, data: { vars: [Topic], prompt: "{Topic}" } }
  - { id: p2, type: prompt, data: { vars: [topic], prompt: "{topic}" } }
  - { id: join, type: prompt, data: { vars: [left, right], prompt: "{left} {right}" } }
edges:
  - { source: a, sourceHandle: output, target: p1, targetHandle: Topic }
  - { source: b, sourceHandle: output, target: p2, targetHandle: topic }
  - { source: p1, sourceHandle: prompt, target: join, targetHandle: left }
  - { source: p2, sourceHandle: prompt, target: join, targetHandle: right }
"#,
    )
    .unwrap();

    let mut runner = runner_for(doc, EvaluatorRegistry::new());
    let err = runner.pull("join").unwrap_err();
    assert!(matches!(err, FlowError::DuplicateVariableName { .. }));
    assert!(err.to_string().to_lowercase().contains("topic"));
}

#[test]
fn test_cycle_is_reported() {
    let doc = FlowLoader::parse(
        r#"
nodes:
  - { id: a, type: prompt, data: { vars: [b_out], prompt: "{b_out}" } }
  - { id: b, type: prompt, data: { vars: [a_out], prompt: "{a_out}" } }
edges:
  - { source: b, sourceHandle: prompt, target: a, targetHandle: b_out }
  - { source: a, sourceHandle: prompt, target: b, targetHandle: a_out }
"#,
    )
    .unwrap();

    let mut runner = runner_for(doc, EvaluatorRegistry::new());
    match runner.pull("a") {
        Err(FlowError::CyclicGraph { path }) => assert_eq!(path, vec!["a", "b", "a"]),
        other => panic!("expected a cycle error, got {:?}", other),
    }
}

// ============================================================================
// Evaluation Tests
// ============================================================================

#[test]
fn test_mock_evaluator_outputs_merge_by_uid() {
    let inputs = responses_x();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let outputs = runtime.block_on(async {
        let a = FixedEvaluator {
            name: "A".to_string(),
            items: vec![json!(1), json!(0)],
        };
        let len = FixedEvaluator {
            name: "len".to_string(),
            items: vec![json!(2), json!(2)],
        };
        let reporter = ProgressReporter::detached("mock");
        vec![
            (a.name().to_string(), a.run(&inputs, &reporter).await.unwrap()),
            (len.name().to_string(), len.run(&inputs, &reporter).await.unwrap()),
        ]
    });

    let named = outputs
        .into_iter()
        .map(|(evaluator, output)| NamedResults {
            responses: output.into_batched(&evaluator).unwrap(),
            evaluator,
        })
        .collect();
    let merged = merge_eval_results(named);

    let eval = merged.responses[0].eval_res.as_ref().unwrap();
    assert_eq!(eval.dtype, EvalResultType::KeyValueMixed);
    assert_eq!(
        eval.items,
        vec![json!({"A": 1, "len": 2}), json!({"A": 0, "len": 2})]
    );
}

#[tokio::test]
async fn test_code_and_llm_evaluators_run_together() {
    let registry = EvaluatorRegistry::with_builtins().await;
    let judge = Arc::new(KeywordJudge::new("default", "r1"));
    registry.register_judge(judge.clone()).await;

    let orchestrator = EvalOrchestrator::new(registry);
    let descriptors = vec![
        EvaluatorDescriptor::new(
            "e1",
            "A",
            EvaluatorKind::Llm,
            json!({"prompt": "Grade: {input}"}),
        ),
        EvaluatorDescriptor::new("e2", "len", EvaluatorKind::Code, json!({"builtin": "length"})),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = orchestrator
        .run_all_stream(&descriptors, &responses_x(), tx)
        .await;

    assert!(run.is_ok());
    assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        run.responses[0].eval_res.as_ref().unwrap().items,
        vec![json!({"A": 1, "len": 2}), json!({"A": 0, "len": 2})]
    );
    assert_eq!(run.responses[0].llm, "gpt-mock");

    let mut finished = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, EvalEvent::Finished { ok: true, .. }) {
            finished += 1;
        }
    }
    assert_eq!(finished, 2);
    assert!(orchestrator.board().is_empty());
}

#[tokio::test]
async fn test_runner_evaluates_and_keeps_partial_results() {
    let doc = FlowLoader::parse(
        r#"
nodes:
  - id: gen
    type: prompt
    data: { prompt: "Say something" }
  - id: ev
    type: evaluator
    data:
      evaluators:
        - { uid: e1, name: judged, type: llm, state: { prompt: "{input}", grader: down } }
        - { uid: e2, name: words, type: code, state: { builtin: word_count } }
  - id: vis
    type: vis
    data: {}
edges:
  - { source: gen, sourceHandle: output, target: ev, targetHandle: responseBatch }
  - { source: ev, sourceHandle: output, target: vis, targetHandle: input }
"#,
    )
    .unwrap();

    let registry = EvaluatorRegistry::with_builtins().await;
    registry.register_judge(Arc::new(DownJudge)).await;
    let mut runner = runner_for(doc, registry);

    let mut fetcher = MemoryResponses::new();
    fetcher.insert(
        "gen",
        vec![LLMResponse::new(
            "x",
            vec!["one two".to_string(), "three".to_string()],
        )],
    );

    let run = runner.run_evaluators("ev", &fetcher).await.unwrap();

    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].name, "judged");
    assert!(matches!(run.failures[0].error, EvalError::Judge { failed: 2, total: 2, .. }));

    let output = &runner.store().node("ev").unwrap().data["output"];
    assert_eq!(
        output[0]["eval_res"]["items"],
        json!([{"words": 2}, {"words": 1}])
    );
    assert_eq!(output[0]["eval_res"]["dtype"], "KeyValue_Mixed");
    assert!(runner.store().node("vis").unwrap().needs_refresh());
}

#[tokio::test]
async fn test_runner_reads_responses_file() {
    let path = std::env::temp_dir().join(format!("responses-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        json!({"gen": [{"uid": "x", "responses": ["{\"ok\": true}", "nope"]}]}).to_string(),
    )
    .unwrap();
    let fetcher = MemoryResponses::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    let mut doc = FlowDocument::default();
    doc.nodes.push(promptgraph_rs::flow::Node::new("gen", "prompt", json!({})));
    doc.nodes.push(promptgraph_rs::flow::Node::new(
        "ev",
        "evaluator",
        json!({"evaluators": [{
            "uid": "e1",
            "name": "json",
            "type": "code",
            "state": {"builtin": "is_json"}
        }]}),
    ));
    doc.edges.push(promptgraph_rs::flow::Edge::new(
        "gen",
        "output",
        "ev",
        "responseBatch",
    ));

    let mut runner = runner_for(doc, EvaluatorRegistry::with_builtins().await);
    let run = runner.run_evaluators("ev", &fetcher).await.unwrap();
    assert_eq!(
        run.responses[0].eval_res.as_ref().unwrap().items,
        vec![json!({"json": true}), json!({"json": false})]
    );
}

// ============================================================================
// Identity and Config Tests
// ============================================================================

#[test]
fn test_unbatch_then_batch_restores_records() {
    let mut record = LLMResponse::new("x", vec!["a".to_string(), "b".to_string()]);
    record.eval_res = Some(EvalResults::inferred(vec![json!(1), json!(2)]));

    let singles = unbatch(vec![record.clone()]);
    assert_eq!(singles.len(), 2);

    let batched = batch_by_uid(singles);
    assert_eq!(batched.len(), 1);
    assert_eq!(batched[0].responses, record.responses);
    assert_eq!(batched[0].eval_res.as_ref().unwrap().items, vec![json!(1), json!(2)]);
}

#[test]
fn test_config_from_yaml_drives_refresh() {
    let config =
        EngineConfig::parse_yaml("refreshable_types: [prompt]\ngrade_concurrency: 2\n").unwrap();
    assert_eq!(config.grade_concurrency, 2);

    let mut store = GraphStore::from_document(
        TABLE_FLOW.clone(),
        config.refreshable_types.iter().cloned(),
    );

    assert_eq!(store.ping_outputs("table"), vec!["question".to_string()]);
    assert!(store.ping_outputs("question").is_empty());
}
