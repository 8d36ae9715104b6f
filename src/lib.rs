// SPDX-License-Identifier: MIT

//! promptgraph-rs: dataflow engine for prompt-engineering graphs
//!
//! Nodes exchange template variables along edges (`flow`), prompts are
//! filled with every combination of pulled values (`template`), and
//! evaluators score prior LLM responses concurrently (`eval`).

pub mod config;
pub mod error;
pub mod eval;
pub mod flow;
pub mod identity;
pub mod runner;
pub mod template;

pub use config::EngineConfig;
pub use error::{EvalError, FlowError};
pub use runner::{FlowRunner, MemoryResponses, ResponseFetcher};
