// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Values come from an optional YAML file, then environment overrides:
//! - `PROMPTGRAPH_REFRESHABLE_TYPES` - comma-separated node types
//! - `PROMPTGRAPH_GRADE_CONCURRENCY` - concurrent judge calls per evaluator
//! - `PROMPTGRAPH_EVAL_TIMEOUT_SECS` - per-evaluator timeout

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::FlowError;

const ENV_REFRESHABLE_TYPES: &str = "PROMPTGRAPH_REFRESHABLE_TYPES";
const ENV_GRADE_CONCURRENCY: &str = "PROMPTGRAPH_GRADE_CONCURRENCY";
const ENV_EVAL_TIMEOUT_SECS: &str = "PROMPTGRAPH_EVAL_TIMEOUT_SECS";

/// Runtime configuration for the pull engine and evaluator orchestrator
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Node types that get `refresh: true` when an upstream node changes
    pub refreshable_types: Vec<String>,
    /// Max concurrent judge calls inside one LLM evaluator
    pub grade_concurrency: usize,
    /// Per-evaluator timeout; `None` waits forever
    pub eval_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refreshable_types: vec!["inspect".to_string(), "vis".to_string()],
            grade_concurrency: 4,
            eval_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Load config from an optional YAML file and apply env overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, FlowError> {
        let config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)?;
                Self::parse_yaml(&content)?
            }
            None => Self::default(),
        };
        config.with_env_overrides()
    }

    /// Parse config from a YAML string
    pub fn parse_yaml(content: &str) -> Result<Self, FlowError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, FlowError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, get: F) -> Result<Self, FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(types) = get(ENV_REFRESHABLE_TYPES) {
            self.refreshable_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Some(raw) = get(ENV_GRADE_CONCURRENCY) {
            let value: usize = raw.trim().parse().map_err(|_| {
                FlowError::config(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_GRADE_CONCURRENCY, raw
                ))
            })?;
            if value == 0 {
                return Err(FlowError::config(format!(
                    "{} must be at least 1",
                    ENV_GRADE_CONCURRENCY
                )));
            }
            self.grade_concurrency = value;
        }

        if let Some(raw) = get(ENV_EVAL_TIMEOUT_SECS) {
            let value: u64 = raw.trim().parse().map_err(|_| {
                FlowError::config(format!(
                    "{} must be an integer, got '{}'",
                    ENV_EVAL_TIMEOUT_SECS, raw
                ))
            })?;
            self.eval_timeout_secs = Some(value);
        }

        Ok(self)
    }
}
