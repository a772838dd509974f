// src/exec/simulated.rs

//! In-process executor that completes tasks from a fixed plan.
//!
//! Every dispatched task succeeds (unless the plan makes its first attempts
//! fail) with a small JSON payload. Tasks that declare flow control answer
//! with the decision the plan prescribes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dag::{DispatchRequest, FlowAction, FlowSpec};
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::job::TaskOutcome;

/// Which branch simulated IF tasks pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfBranch {
    #[default]
    Then,
    Else,
}

/// Decisions taken by [`SimulatedExecutorBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationPlan {
    /// Times a loop body runs in total; 1 means it never repeats.
    pub loop_iterations: u32,
    pub replicate_runs: u32,
    pub if_branch: IfBranch,
    /// Delay before each outcome is reported.
    pub delay_ms: u64,
    /// Task name -> number of leading attempts that raise an exception.
    pub fail_first: IndexMap<String, u32>,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            loop_iterations: 1,
            replicate_runs: 1,
            if_branch: IfBranch::Then,
            delay_ms: 0,
            fail_first: IndexMap::new(),
        }
    }
}

impl SimulationPlan {
    /// Outcome the simulated executor reports for `request`.
    pub fn outcome_for(&self, request: &DispatchRequest) -> TaskOutcome {
        let name = request.task.readable_name();
        let failing = self
            .fail_first
            .get(request.task.name())
            .copied()
            .unwrap_or(0);
        if request.attempt <= failing {
            return TaskOutcome::user_exception(json!({
                "message": format!("simulated failure of {name}"),
                "attempt": request.attempt,
            }));
        }

        let payload = json!({ "task": name, "attempt": request.attempt });
        let action = match &request.flow {
            None => return TaskOutcome::success(payload),
            Some(FlowSpec::If {
                target,
                else_target,
                continuation,
            }) => {
                let (target, else_target) = match self.if_branch {
                    IfBranch::Then => (target.clone(), else_target.clone()),
                    IfBranch::Else => (else_target.clone(), target.clone()),
                };
                FlowAction::If {
                    target,
                    else_target,
                    continuation: continuation.clone(),
                }
            }
            Some(FlowSpec::Loop { target }) => FlowAction::Loop {
                target: target.clone(),
                repeat: request.task.iteration() + 1 < self.loop_iterations,
            },
            Some(FlowSpec::Replicate) => FlowAction::Replicate {
                runs: self.replicate_runs.max(1),
            },
        };
        TaskOutcome::with_flow(payload, action)
    }
}

/// Completes every dispatched task on a spawned tokio task.
pub struct SimulatedExecutorBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    plan: Arc<SimulationPlan>,
}

impl SimulatedExecutorBackend {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, plan: SimulationPlan) -> Self {
        Self {
            runtime_tx,
            plan: Arc::new(plan),
        }
    }
}

impl ExecutorBackend for SimulatedExecutorBackend {
    fn dispatch(
        &mut self,
        tasks: Vec<DispatchRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let plan = Arc::clone(&self.plan);

        Box::pin(async move {
            for request in tasks {
                let tx = tx.clone();
                let plan = Arc::clone(&plan);
                // Reporting from a separate task keeps the runtime loop free to
                // drain its own channel.
                tokio::spawn(async move {
                    if plan.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(plan.delay_ms)).await;
                    }
                    let outcome = plan.outcome_for(&request);
                    debug!(task = %request.task, ?outcome, "simulated task completed");
                    let event = RuntimeEvent::TaskTerminated {
                        task: request.task,
                        outcome,
                    };
                    if tx.send(event).await.is_err() {
                        warn!("runtime gone before simulated outcome could be reported");
                    }
                });
            }
            Ok(())
        })
    }
}
