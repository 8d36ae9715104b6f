// SPDX-License-Identifier: MIT

//! Typed error handling for promptgraph-rs
//!
//! `FlowError` covers graph-level failures (pulling, loading, config),
//! `EvalError` covers a single evaluator's failure during a run.

use thiserror::Error;

/// Top-level error type for promptgraph-rs
#[derive(Debug, Error)]
pub enum FlowError {
    /// Two bindings in the upstream closure of a node share a name
    #[error("Duplicate variable name '{name}' at node '{node_id}'; names must be unique upstream")]
    DuplicateVariableName { name: String, node_id: String },

    /// The declared-vars chain loops back onto a node already being pulled
    #[error("Cyclic variable dependency: {}", path.join(" -> "))]
    CyclicGraph { path: Vec<String> },

    /// Node lookup failed
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    /// A node's data record does not have the expected shape
    #[error("Invalid data on node '{node_id}': {message}")]
    InvalidNodeData { node_id: String, message: String },

    /// An evaluator failed during a run
    #[error("Evaluator error: {0}")]
    Evaluator(#[from] EvalError),

    /// Configuration errors (bad env vars, invalid config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

/// Failure of a single evaluator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// Code evaluator reported an error for its batch
    #[error("Code evaluator '{evaluator}' failed: {message}")]
    Code { evaluator: String, message: String },

    /// LLM judge failed on one or more responses
    #[error("LLM evaluator '{evaluator}' failed on {failed}/{total} responses: {message}")]
    Judge {
        evaluator: String,
        failed: usize,
        total: usize,
        message: String,
    },

    /// External evaluator process could not run or misbehaved
    #[error("Evaluator process for '{evaluator}' failed: {message}")]
    Process { evaluator: String, message: String },

    /// Evaluator did not finish in time
    #[error("Evaluator '{evaluator}' timed out after {secs}s")]
    Timeout { evaluator: String, secs: u64 },

    /// Descriptor refers to a judge that was never registered
    #[error("Judge '{0}' not registered")]
    UnknownJudge(String),

    /// Descriptor cannot be turned into a runnable evaluator
    #[error("Invalid evaluator '{evaluator}': {message}")]
    InvalidDescriptor { evaluator: String, message: String },
}

impl FlowError {
    /// Create a duplicate variable name error
    pub fn duplicate_name(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::DuplicateVariableName {
            name: name.into(),
            node_id: node_id.into(),
        }
    }

    /// Create an invalid node data error
    pub fn invalid_data(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNodeData {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl EvalError {
    pub fn process(evaluator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            evaluator: evaluator.into(),
            message: message.into(),
        }
    }

    pub fn invalid(evaluator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            evaluator: evaluator.into(),
            message: message.into(),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for FlowError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}
