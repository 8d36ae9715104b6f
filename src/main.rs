// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use promptgraph_rs::eval::{CommandJudge, EvaluatorRegistry};
use promptgraph_rs::flow::FlowLoader;
use promptgraph_rs::{EngineConfig, FlowError, FlowRunner, MemoryResponses};

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the variables pulled into a node
    Pull {
        /// Path to the flow file
        #[arg(short, long)]
        flow: PathBuf,

        /// Node to pull into
        #[arg(short, long)]
        node: String,

        /// Save the flow back after pruning stale edges
        #[arg(short, long)]
        write: bool,
    },
    /// Print every prompt a node generates
    Prompts {
        /// Path to the flow file
        #[arg(short, long)]
        flow: PathBuf,

        /// Prompt node
        #[arg(short, long)]
        node: String,
    },
    /// Run a node's evaluators over prior responses
    Eval {
        /// Path to the flow file
        #[arg(short, long)]
        flow: PathBuf,

        /// Evaluator node
        #[arg(short, long)]
        node: String,

        /// JSON or YAML file mapping node id to its responses
        #[arg(short, long)]
        responses: PathBuf,

        /// Command answering grading prompts, registered as the default judge
        #[arg(short, long, env = "PROMPTGRAPH_JUDGE_COMMAND")]
        judge_command: Option<String>,

        /// Save the flow back with the merged output
        #[arg(short, long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_ref())?;
    let loader = FlowLoader::new();

    match args.command {
        Commands::Pull { flow, node, write } => {
            let doc = loader.load_flow(&flow)?;
            let mut runner = FlowRunner::from_document(doc, config, EvaluatorRegistry::new());

            let bindings = runner.pull(&node)?;
            println!("{}", serde_json::to_string_pretty(&bindings)?);

            if write {
                loader.save_flow(&flow, &runner.to_document())?;
                log::info!("Saved {}", flow.display());
            }
        }
        Commands::Prompts { flow, node } => {
            let doc = loader.load_flow(&flow)?;
            let mut runner = FlowRunner::from_document(doc, config, EvaluatorRegistry::new());

            for prompt in runner.prompts(&node)? {
                println!("{}", prompt.display_text());
            }
        }
        Commands::Eval {
            flow,
            node,
            responses,
            judge_command,
            write,
        } => {
            let doc = loader.load_flow(&flow)?;
            let fetcher = MemoryResponses::load(&responses)?;

            let registry = EvaluatorRegistry::with_builtins().await;
            if let Some(command) = judge_command {
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts
                    .next()
                    .ok_or_else(|| FlowError::config("empty judge command"))?;
                log::info!("Using judge command: {}", command);
                registry
                    .register_judge(Arc::new(CommandJudge::new(
                        "default",
                        program,
                        parts.collect(),
                    )))
                    .await;
            }

            let mut runner = FlowRunner::from_document(doc, config, registry);
            let run = runner.run_evaluators(&node, &fetcher).await?;
            println!("{}", serde_json::to_string_pretty(&run.responses)?);

            for failure in &run.failures {
                eprintln!("Evaluator {} failed: {}", failure.name, failure.error);
            }
            for conflict in &run.conflicts {
                eprintln!(
                    "Evaluator {} scored {} responses for {} (expected {})",
                    conflict.evaluator, conflict.found, conflict.uid, conflict.expected
                );
            }

            if write {
                loader.save_flow(&flow, &runner.to_document())?;
                log::info!("Saved {}", flow.display());
            }

            if !run.is_ok() {
                let message = format!("{} evaluator(s) failed", run.failures.len());
                return Err(FlowError::other(message).into());
            }
        }
    }

    Ok(())
}
