// src/job/outcome.rs

//! Outcomes reported back by the execution boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::FlowAction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        payload: Value,
        #[serde(default)]
        flow: Option<FlowAction>,
    },
    /// The task's own code raised an error.
    UserException { payload: Value },
    /// The task did not produce a usable outcome because its resource
    /// (node, script evaluation) failed underneath it.
    ResourceFailure { reason: String },
    /// Killed at the executor. Never retried.
    Killed,
}

impl TaskOutcome {
    pub fn success(payload: impl Into<Value>) -> Self {
        TaskOutcome::Success {
            payload: payload.into(),
            flow: None,
        }
    }

    pub fn with_flow(payload: impl Into<Value>, action: FlowAction) -> Self {
        TaskOutcome::Success {
            payload: payload.into(),
            flow: Some(action),
        }
    }

    pub fn user_exception(payload: impl Into<Value>) -> Self {
        TaskOutcome::UserException {
            payload: payload.into(),
        }
    }

    pub fn resource_failure(reason: impl Into<String>) -> Self {
        TaskOutcome::ResourceFailure {
            reason: reason.into(),
        }
    }
}
