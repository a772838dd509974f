// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info, warn};

use crate::dag::DispatchRequest;
use crate::engine::registry::Scheduler;
use crate::engine::RuntimeOptions;
use crate::errors::Result;
use crate::ids::{JobId, TaskId};
use crate::job::{TaskControl, TaskOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    Dispatch(Vec<DispatchRequest>),
    /// Request that the process exits (used with `exit_when_idle`).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn stop() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: false,
        }
    }
}

/// Job-level request coming from an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
    Kill,
    Pause,
    Resume,
}

/// Handle a task outcome reported by an executor.
///
/// Errors are scoped to the task's job: they are logged and the loop goes
/// on scheduling every other job.
pub fn handle_task_terminated(
    scheduler: &Scheduler,
    options: &RuntimeOptions,
    task: TaskId,
    outcome: TaskOutcome,
) -> CoreStep {
    match scheduler.on_task_terminal(&task, outcome) {
        Ok(step) if step.ignored => {
            debug!(task = %task, "outcome ignored");
        }
        Ok(step) => {
            debug!(
                task = %task,
                state = ?step.final_state,
                restarted = step.restarted,
                eligible = step.newly_eligible.len(),
                status = %step.status,
                "task outcome applied"
            );
        }
        Err(err) => {
            warn!(task = %task, error = %err, "failed to apply task outcome");
        }
    }
    schedule_round(scheduler, options)
}

pub fn handle_job_control(
    scheduler: &Scheduler,
    options: &RuntimeOptions,
    job: JobId,
    control: JobControl,
) -> CoreStep {
    let applied: Result<bool> = match control {
        JobControl::Kill => scheduler.kill_job(&job),
        JobControl::Pause => scheduler.pause_job(&job),
        JobControl::Resume => scheduler.resume_job(&job),
    };
    match applied {
        Ok(true) => info!(job = %job, ?control, "job control applied"),
        Ok(false) => debug!(job = %job, ?control, "job control had no effect"),
        Err(err) => warn!(job = %job, ?control, error = %err, "job control rejected"),
    }
    schedule_round(scheduler, options)
}

/// Handle an operator request on one task. Errors stay scoped to the
/// task's job, as for outcomes.
pub fn handle_task_control(
    scheduler: &Scheduler,
    options: &RuntimeOptions,
    task: TaskId,
    control: TaskControl,
) -> CoreStep {
    match scheduler.control_task(&task, control) {
        Ok(step) if step.ignored => {
            debug!(task = %task, ?control, "task control had no effect")
        }
        Ok(step) => info!(
            task = %task,
            ?control,
            state = ?step.final_state,
            restarted = step.restarted,
            status = %step.status,
            "task control applied"
        ),
        Err(err) => warn!(task = %task, ?control, error = %err, "task control rejected"),
    }
    schedule_round(scheduler, options)
}

/// Start whatever the policy picks and decide whether to keep running.
pub fn schedule_round(scheduler: &Scheduler, options: &RuntimeOptions) -> CoreStep {
    let mut commands = Vec::new();

    let dispatched = scheduler.schedule();
    if !dispatched.is_empty() {
        commands.push(CoreCommand::Dispatch(dispatched));
    }

    if options.exit_when_idle && scheduler.is_idle() {
        info!("every job is terminal; requesting exit");
        commands.push(CoreCommand::RequestExit);
        return CoreStep {
            commands,
            keep_running: false,
        };
    }

    CoreStep {
        commands,
        keep_running: true,
    }
}
