// src/job/result.rs

//! Per-task results and the composed job result.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{Result, SchedulerError};
use crate::ids::{JobId, TaskId};
use crate::job::status::JobStatus;

/// What a terminal task produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultValue {
    Value { value: Value },
    Exception { message: String, payload: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: TaskId,
    pub value: ResultValue,
    /// Copied from the task template at completion time.
    pub precious: bool,
    pub attempts: u32,
}

impl TaskResult {
    pub fn value(task: TaskId, value: Value, precious: bool, attempts: u32) -> Self {
        Self {
            task,
            value: ResultValue::Value { value },
            precious,
            attempts,
        }
    }

    pub fn exception(
        task: TaskId,
        message: impl Into<String>,
        payload: Value,
        precious: bool,
        attempts: u32,
    ) -> Self {
        Self {
            task,
            value: ResultValue::Exception {
                message: message.into(),
                payload,
            },
            precious,
            attempts,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.value, ResultValue::Exception { .. })
    }

    /// Payload for a value result, `None` for an exception.
    pub fn payload(&self) -> Option<&Value> {
        match &self.value {
            ResultValue::Value { value } => Some(value),
            ResultValue::Exception { .. } => None,
        }
    }
}

/// Results of one job, keyed by readable task name (`T1`, `T1#1`, `T1*1`).
///
/// Every name is written at most once. Instances that reached a terminal
/// state without producing a result (pruned branches, tasks that never got
/// to start) are tracked separately as skipped.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    results: IndexMap<String, TaskResult>,
    skipped: Vec<TaskId>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `result` under `name`. A second write for the same name is
    /// refused; the first result stays.
    pub fn record_result(&mut self, name: impl Into<String>, result: TaskResult) -> Result<()> {
        let name = name.into();
        if self.results.contains_key(&name) {
            warn!(task = %name, "duplicate result discarded");
            return Err(SchedulerError::DuplicateResult(name));
        }
        self.results.insert(name, result);
        Ok(())
    }

    pub fn record_skipped(&mut self, tasks: impl IntoIterator<Item = TaskId>) {
        self.skipped.extend(tasks);
    }

    pub fn get(&self, name: &str) -> Option<&TaskResult> {
        self.results.get(name)
    }

    pub fn get_all_results(&self) -> &IndexMap<String, TaskResult> {
        &self.results
    }

    pub fn get_precious_results(&self) -> IndexMap<String, TaskResult> {
        self.filtered(|r| r.precious)
    }

    pub fn get_exception_results(&self) -> IndexMap<String, TaskResult> {
        self.filtered(TaskResult::is_exception)
    }

    pub fn had_exception(&self) -> bool {
        self.results.values().any(TaskResult::is_exception)
    }

    pub fn skipped(&self) -> &[TaskId] {
        &self.skipped
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn filtered(&self, keep: impl Fn(&TaskResult) -> bool) -> IndexMap<String, TaskResult> {
        self.results
            .iter()
            .filter(|(_, r)| keep(r))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }
}

/// Composed result handed back once a job is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: JobId,
    pub status: JobStatus,
    pub results: IndexMap<String, TaskResult>,
    pub precious: Vec<String>,
    pub exceptions: Vec<String>,
    pub skipped: Vec<String>,
}

impl JobResult {
    pub(crate) fn compose(job: JobId, status: JobStatus, aggregator: &ResultAggregator) -> Self {
        let results = aggregator.get_all_results().clone();
        let precious = results
            .iter()
            .filter(|(_, r)| r.precious)
            .map(|(k, _)| k.clone())
            .collect();
        let exceptions = results
            .iter()
            .filter(|(_, r)| r.is_exception())
            .map(|(k, _)| k.clone())
            .collect();
        let skipped = aggregator.skipped().iter().map(TaskId::readable_name).collect();
        Self {
            job,
            status,
            results,
            precious,
            exceptions,
            skipped,
        }
    }

    pub fn had_exception(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn payload(&self, name: &str) -> Option<&Value> {
        self.results.get(name).and_then(TaskResult::payload)
    }
}
