// SPDX-License-Identifier: MIT

//! Evaluator progress tracking
//!
//! Each running evaluator writes its latest `{success, error}`
//! percentages to a shared board; the entry is cleared when that
//! evaluator finishes. Last write wins, there is no ordering between
//! evaluators.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Share of an evaluator's workload done, as percentages
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
pub struct Progress {
    pub success: f64,
    pub error: f64,
}

impl Progress {
    pub fn from_counts(success: usize, error: usize, total: usize) -> Self {
        if total == 0 {
            return Self {
                success: 100.0,
                error: 0.0,
            };
        }
        let total = total as f64;
        Self {
            success: success as f64 / total * 100.0,
            error: error as f64 / total * 100.0,
        }
    }
}

/// Events emitted while evaluators run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EvalEvent {
    Progress { evaluator: String, progress: Progress },
    Finished { evaluator: String, ok: bool },
}

/// Latest progress per evaluator uid
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    entries: Arc<Mutex<HashMap<String, Progress>>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Progress>> {
        // A panicking writer cannot leave a half-written Progress behind
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, evaluator_uid: &str, progress: Progress) {
        self.entries().insert(evaluator_uid.to_string(), progress);
    }

    pub fn clear(&self, evaluator_uid: &str) {
        self.entries().remove(evaluator_uid);
    }

    pub fn get(&self, evaluator_uid: &str) -> Option<Progress> {
        self.entries().get(evaluator_uid).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Handle given to one evaluator run for reporting its progress
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    evaluator_uid: String,
    board: ProgressBoard,
    events: Option<mpsc::UnboundedSender<EvalEvent>>,
}

impl ProgressReporter {
    pub fn new(
        evaluator_uid: impl Into<String>,
        board: ProgressBoard,
        events: Option<mpsc::UnboundedSender<EvalEvent>>,
    ) -> Self {
        Self {
            evaluator_uid: evaluator_uid.into(),
            board,
            events,
        }
    }

    /// Reporter writing to a private board, for running an evaluator on its own
    pub fn detached(evaluator_uid: impl Into<String>) -> Self {
        Self::new(evaluator_uid, ProgressBoard::new(), None)
    }

    pub fn report(&self, progress: Progress) {
        self.board.set(&self.evaluator_uid, progress);
        if let Some(tx) = &self.events {
            let _ = tx.send(EvalEvent::Progress {
                evaluator: self.evaluator_uid.clone(),
                progress,
            });
        }
    }

    pub fn report_counts(&self, success: usize, error: usize, total: usize) {
        self.report(Progress::from_counts(success, error, total));
    }

    /// Clear this evaluator's entry and announce completion
    pub fn finish(&self, ok: bool) {
        self.board.clear(&self.evaluator_uid);
        if let Some(tx) = &self.events {
            let _ = tx.send(EvalEvent::Finished {
                evaluator: self.evaluator_uid.clone(),
                ok,
            });
        }
    }
}
